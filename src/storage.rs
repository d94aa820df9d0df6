use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous},
    Pool, Row, Sqlite,
};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::error::{RiskError, RiskResult};
use crate::models::{
    AttendanceKey, AttendanceRecord, AttendanceStatus, Grade, Notification, RiskAssessment,
    Student, StudentMetricSnapshot, StudyHabit, Subject,
};

/// Read-only lookups of the people and courses the pipeline works on.
#[async_trait]
pub trait StudentDirectory: Send + Sync {
    async fn find_student(&self, id: &str) -> RiskResult<Option<Student>>;
    async fn find_subject(&self, id: &str) -> RiskResult<Option<Subject>>;
}

/// Aggregates a student's academic signals at request time.
#[async_trait]
pub trait MetricSnapshotProvider: Send + Sync {
    async fn snapshot(&self, student: &Student) -> RiskResult<StudentMetricSnapshot>;
}

/// Append-only assessment log. The only update allowed is the single
/// forward transition out of `Calculando`.
#[async_trait]
pub trait AssessmentStore: Send + Sync {
    async fn insert_assessment(&self, assessment: &RiskAssessment) -> RiskResult<()>;
    /// Fails with `Conflict` when the row already left `Calculando`.
    async fn finalize_assessment(&self, assessment: &RiskAssessment) -> RiskResult<()>;
    async fn mark_assessment_error(&self, id: &str) -> RiskResult<bool>;
    async fn find_assessment(&self, id: &str) -> RiskResult<Option<RiskAssessment>>;
    /// Newest first. In-flight rows are returned as stored: state
    /// `Calculando`, level `Medio` and model `pending` until finalized.
    async fn assessments_for_student(&self, student_id: &str) -> RiskResult<Vec<RiskAssessment>>;
    /// Includes in-flight rows, see [`Self::assessments_for_student`].
    async fn list_assessments(&self) -> RiskResult<Vec<RiskAssessment>>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert_notification(&self, notification: &Notification) -> RiskResult<()>;
    async fn notifications_for_student(
        &self,
        student_id: &str,
        limit: Option<i64>,
    ) -> RiskResult<Vec<Notification>>;
    async fn unread_notifications(&self, student_id: &str) -> RiskResult<Vec<Notification>>;
    async fn count_unread(&self, student_id: &str) -> RiskResult<i64>;
    async fn mark_notification_read(&self, id: &str) -> RiskResult<bool>;
    async fn mark_all_read(&self, student_id: &str) -> RiskResult<u64>;
    async fn delete_notification(&self, id: &str) -> RiskResult<bool>;
}

#[async_trait]
pub trait AttendanceStore: Send + Sync {
    async fn find_attendance(&self, key: &AttendanceKey) -> RiskResult<Option<AttendanceRecord>>;
    /// Fails with `Conflict` when the natural key is already taken.
    async fn insert_attendance(
        &self,
        key: &AttendanceKey,
        status: AttendanceStatus,
    ) -> RiskResult<AttendanceRecord>;
    async fn update_attendance_status(
        &self,
        id: &str,
        status: AttendanceStatus,
    ) -> RiskResult<AttendanceRecord>;
    async fn attendance_for_student(&self, student_id: &str) -> RiskResult<Vec<AttendanceRecord>>;
}

#[async_trait]
pub trait GradeStore: Send + Sync {
    async fn insert_grade(&self, grade: &Grade) -> RiskResult<()>;
    /// `NotFound` when no grade has the id
    async fn update_grade(&self, id: &str, value: f64) -> RiskResult<Grade>;
}

/// SQLite storage in WAL mode backing every store trait
pub struct StorageEngine {
    pool: Pool<Sqlite>,
    state: Arc<RwLock<StorageState>>,
}

#[derive(Debug, Clone, Default)]
pub struct StorageState {
    pub assessments_stored: u64,
    pub notifications_stored: u64,
    pub attendance_writes: u64,
    pub grades_stored: u64,
    pub last_write: Option<DateTime<Utc>>,
}

impl StorageEngine {
    pub async fn new(config: &StorageConfig) -> RiskResult<Self> {
        info!("💾 Initializing SQLite storage engine with WAL mode");

        if let Some(parent) = Path::new(&config.db_path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    RiskError::StorageError(format!("Failed to create database directory: {}", e))
                })?;
            }
        }

        let connect_options = SqliteConnectOptions::new()
            .filename(&config.db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .pragma("cache_size", "-16000")
            .pragma("temp_store", "memory");

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect_with(connect_options)
            .await
            .map_err(|e| RiskError::StorageError(format!("Failed to create database pool: {}", e)))?;

        let storage = Self {
            pool,
            state: Arc::new(RwLock::new(StorageState::default())),
        };

        storage.initialize_schema().await?;

        info!("✅ SQLite storage engine initialized at {}", config.db_path);
        Ok(storage)
    }

    async fn initialize_schema(&self) -> RiskResult<()> {
        info!("🗄️  Initializing database schema");

        let tables = [
            (
                "students",
                r#"
                CREATE TABLE IF NOT EXISTS students (
                    id TEXT PRIMARY KEY,
                    given_names TEXT NOT NULL,
                    surnames TEXT NOT NULL,
                    semester INTEGER NOT NULL
                )
            "#,
            ),
            (
                "subjects",
                r#"
                CREATE TABLE IF NOT EXISTS subjects (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL
                )
            "#,
            ),
            (
                "grades",
                r#"
                CREATE TABLE IF NOT EXISTS grades (
                    id TEXT PRIMARY KEY,
                    student_id TEXT NOT NULL REFERENCES students(id),
                    subject_id TEXT NOT NULL REFERENCES subjects(id),
                    period TEXT NOT NULL,
                    evaluation_type TEXT NOT NULL,
                    grade REAL NOT NULL,
                    created_at TEXT NOT NULL
                )
            "#,
            ),
            (
                "study_habits",
                r#"
                CREATE TABLE IF NOT EXISTS study_habits (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    student_id TEXT NOT NULL REFERENCES students(id),
                    recorded_at TEXT NOT NULL,
                    weekly_hours REAL NOT NULL,
                    uses_techniques BOOLEAN NOT NULL,
                    participation TEXT NOT NULL,
                    task_submission_pct REAL NOT NULL
                )
            "#,
            ),
            (
                "risk_assessments",
                r#"
                CREATE TABLE IF NOT EXISTS risk_assessments (
                    id TEXT PRIMARY KEY,
                    student_id TEXT NOT NULL REFERENCES students(id),
                    assessed_at TEXT NOT NULL,
                    risk_level TEXT NOT NULL,
                    probability REAL,
                    score REAL,
                    key_factors TEXT NOT NULL,
                    recommendations TEXT NOT NULL,
                    state TEXT NOT NULL,
                    model TEXT NOT NULL,
                    period TEXT
                )
            "#,
            ),
            (
                "notifications",
                r#"
                CREATE TABLE IF NOT EXISTS notifications (
                    id TEXT PRIMARY KEY,
                    student_id TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    title TEXT NOT NULL,
                    message TEXT NOT NULL,
                    priority TEXT NOT NULL,
                    read BOOLEAN NOT NULL DEFAULT FALSE,
                    metadata TEXT NOT NULL,
                    created_at TEXT NOT NULL
                )
            "#,
            ),
            (
                "attendance",
                r#"
                CREATE TABLE IF NOT EXISTS attendance (
                    id TEXT PRIMARY KEY,
                    student_id TEXT NOT NULL REFERENCES students(id),
                    subject_id TEXT NOT NULL REFERENCES subjects(id),
                    period TEXT NOT NULL,
                    class_date TEXT NOT NULL,
                    status TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    UNIQUE (student_id, subject_id, period, class_date)
                )
            "#,
            ),
        ];

        for (name, sql) in tables {
            sqlx::query(sql).execute(&self.pool).await.map_err(|e| {
                RiskError::StorageError(format!("Failed to create {} table: {}", name, e))
            })?;
        }

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_grades_student ON grades(student_id)",
            "CREATE INDEX IF NOT EXISTS idx_habits_student ON study_habits(student_id, recorded_at)",
            "CREATE INDEX IF NOT EXISTS idx_assessments_student ON risk_assessments(student_id, assessed_at)",
            "CREATE INDEX IF NOT EXISTS idx_notifications_student ON notifications(student_id, read)",
            "CREATE INDEX IF NOT EXISTS idx_attendance_student ON attendance(student_id)",
        ];

        for index_sql in indexes {
            sqlx::query(index_sql)
                .execute(&self.pool)
                .await
                .map_err(|e| RiskError::StorageError(format!("Failed to create index: {}", e)))?;
        }

        info!("✅ Database schema initialized with indexes");
        Ok(())
    }

    pub async fn insert_student(&self, student: &Student) -> RiskResult<()> {
        sqlx::query("INSERT INTO students (id, given_names, surnames, semester) VALUES (?, ?, ?, ?)")
            .bind(&student.id)
            .bind(&student.given_names)
            .bind(&student.surnames)
            .bind(student.semester)
            .execute(&self.pool)
            .await
            .map_err(|e| map_unique(e, format!("student {} already exists", student.id)))?;
        Ok(())
    }

    pub async fn insert_subject(&self, subject: &Subject) -> RiskResult<()> {
        sqlx::query("INSERT INTO subjects (id, name) VALUES (?, ?)")
            .bind(&subject.id)
            .bind(&subject.name)
            .execute(&self.pool)
            .await
            .map_err(|e| map_unique(e, format!("subject {} already exists", subject.id)))?;
        Ok(())
    }

    pub async fn insert_study_habit(&self, habit: &StudyHabit) -> RiskResult<()> {
        sqlx::query(
            r#"
            INSERT INTO study_habits (
                student_id, recorded_at, weekly_hours, uses_techniques,
                participation, task_submission_pct
            ) VALUES (?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(&habit.student_id)
        .bind(habit.recorded_at)
        .bind(habit.weekly_hours)
        .bind(habit.uses_techniques)
        .bind(habit.participation.as_str())
        .bind(habit.task_submission_pct)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_state(&self) -> StorageState {
        self.state.read().await.clone()
    }

    pub async fn close(&self) {
        info!("🔄 Closing storage pool");
        self.pool.close().await;
    }

    async fn touch<F: FnOnce(&mut StorageState)>(&self, update: F) {
        let mut state = self.state.write().await;
        update(&mut state);
        state.last_write = Some(Utc::now());
    }

    async fn fetch_attendance_by_id(&self, id: &str) -> RiskResult<AttendanceRecord> {
        let row = sqlx::query("SELECT * FROM attendance WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RiskError::not_found("Attendance", id))?;
        row_to_attendance(&row)
    }
}

#[async_trait]
impl StudentDirectory for StorageEngine {
    async fn find_student(&self, id: &str) -> RiskResult<Option<Student>> {
        let row = sqlx::query("SELECT id, given_names, surnames, semester FROM students WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| -> RiskResult<Student> {
            Ok(Student {
                id: row.try_get("id")?,
                given_names: row.try_get("given_names")?,
                surnames: row.try_get("surnames")?,
                semester: row.try_get("semester")?,
            })
        })
        .transpose()
    }

    async fn find_subject(&self, id: &str) -> RiskResult<Option<Subject>> {
        let row = sqlx::query("SELECT id, name FROM subjects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| -> RiskResult<Subject> {
            Ok(Subject {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl MetricSnapshotProvider for StorageEngine {
    async fn snapshot(&self, student: &Student) -> RiskResult<StudentMetricSnapshot> {
        let grades = sqlx::query(
            r#"
            SELECT
                AVG(grade) AS grade_avg,
                AVG(CASE WHEN LOWER(evaluation_type) LIKE 'examen%' THEN grade END) AS exam_avg
            FROM grades WHERE student_id = ?
        "#,
        )
        .bind(&student.id)
        .fetch_one(&self.pool)
        .await?;

        let attendance = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                SUM(CASE WHEN status IN ('Presente', 'Justificado') THEN 1 ELSE 0 END) AS attended
            FROM attendance WHERE student_id = ?
        "#,
        )
        .bind(&student.id)
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = attendance.try_get("total")?;
        let attended: Option<i64> = attendance.try_get("attended")?;
        let attendance_pct = if total > 0 {
            Some(attended.unwrap_or(0) as f64 / total as f64 * 100.0)
        } else {
            None
        };

        let habit = sqlx::query(
            r#"
            SELECT weekly_hours, uses_techniques, participation, task_submission_pct
            FROM study_habits WHERE student_id = ?
            ORDER BY recorded_at DESC, id DESC LIMIT 1
        "#,
        )
        .bind(&student.id)
        .fetch_optional(&self.pool)
        .await?;

        let mut snapshot = StudentMetricSnapshot {
            student_id: student.id.clone(),
            semester: Some(student.semester),
            grade_avg: grades.try_get("grade_avg")?,
            exam_avg: grades.try_get("exam_avg")?,
            attendance_pct,
            ..Default::default()
        };

        if let Some(habit) = habit {
            let participation: String = habit.try_get("participation")?;
            snapshot.study_hours_week = Some(habit.try_get("weekly_hours")?);
            snapshot.uses_study_techniques = Some(habit.try_get("uses_techniques")?);
            snapshot.participation = Some(participation.parse()?);
            snapshot.task_submission_pct = Some(habit.try_get("task_submission_pct")?);
        }

        debug!("📊 Snapshot for {}: {:?}", student.id, snapshot);
        Ok(snapshot)
    }
}

#[async_trait]
impl AssessmentStore for StorageEngine {
    async fn insert_assessment(&self, assessment: &RiskAssessment) -> RiskResult<()> {
        sqlx::query(
            r#"
            INSERT INTO risk_assessments (
                id, student_id, assessed_at, risk_level, probability, score,
                key_factors, recommendations, state, model, period
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(&assessment.id)
        .bind(&assessment.student_id)
        .bind(assessment.assessed_at)
        .bind(assessment.risk_level.as_str())
        .bind(assessment.probability)
        .bind(assessment.score)
        .bind(&assessment.key_factors)
        .bind(serde_json::to_string(&assessment.recommendations)?)
        .bind(assessment.state.as_str())
        .bind(&assessment.model)
        .bind(&assessment.period)
        .execute(&self.pool)
        .await?;

        self.touch(|s| s.assessments_stored += 1).await;
        debug!("🛡️  Stored assessment {} for student {}", assessment.id, assessment.student_id);
        Ok(())
    }

    async fn finalize_assessment(&self, assessment: &RiskAssessment) -> RiskResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE risk_assessments SET
                risk_level = ?, probability = ?, score = ?, key_factors = ?,
                recommendations = ?, state = ?, model = ?
            WHERE id = ? AND state = 'Calculando'
        "#,
        )
        .bind(assessment.risk_level.as_str())
        .bind(assessment.probability)
        .bind(assessment.score)
        .bind(&assessment.key_factors)
        .bind(serde_json::to_string(&assessment.recommendations)?)
        .bind(assessment.state.as_str())
        .bind(&assessment.model)
        .bind(&assessment.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RiskError::Conflict(format!(
                "assessment {} is no longer in Calculando",
                assessment.id
            )));
        }
        Ok(())
    }

    async fn mark_assessment_error(&self, id: &str) -> RiskResult<bool> {
        let result = sqlx::query(
            "UPDATE risk_assessments SET state = 'Error' WHERE id = ? AND state = 'Calculando'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_assessment(&self, id: &str) -> RiskResult<Option<RiskAssessment>> {
        let row = sqlx::query("SELECT * FROM risk_assessments WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_assessment).transpose()
    }

    async fn assessments_for_student(&self, student_id: &str) -> RiskResult<Vec<RiskAssessment>> {
        let rows = sqlx::query(
            "SELECT * FROM risk_assessments WHERE student_id = ? ORDER BY assessed_at DESC, rowid DESC",
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_assessment).collect()
    }

    async fn list_assessments(&self) -> RiskResult<Vec<RiskAssessment>> {
        let rows = sqlx::query("SELECT * FROM risk_assessments ORDER BY assessed_at DESC, rowid DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_assessment).collect()
    }
}

#[async_trait]
impl NotificationStore for StorageEngine {
    async fn insert_notification(&self, notification: &Notification) -> RiskResult<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications (
                id, student_id, kind, title, message, priority, read, metadata, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(&notification.id)
        .bind(&notification.student_id)
        .bind(notification.kind.as_str())
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.priority.as_str())
        .bind(notification.read)
        .bind(notification.metadata.to_string())
        .bind(notification.created_at)
        .execute(&self.pool)
        .await?;

        self.touch(|s| s.notifications_stored += 1).await;
        Ok(())
    }

    async fn notifications_for_student(
        &self,
        student_id: &str,
        limit: Option<i64>,
    ) -> RiskResult<Vec<Notification>> {
        // SQLite treats a negative LIMIT as unbounded
        let rows = sqlx::query(
            "SELECT * FROM notifications WHERE student_id = ? ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(student_id)
        .bind(limit.unwrap_or(-1))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_notification).collect()
    }

    async fn unread_notifications(&self, student_id: &str) -> RiskResult<Vec<Notification>> {
        let rows = sqlx::query(
            "SELECT * FROM notifications WHERE student_id = ? AND read = FALSE ORDER BY created_at DESC, rowid DESC",
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_notification).collect()
    }

    async fn count_unread(&self, student_id: &str) -> RiskResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE student_id = ? AND read = FALSE",
        )
        .bind(student_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn mark_notification_read(&self, id: &str) -> RiskResult<bool> {
        let result = sqlx::query("UPDATE notifications SET read = TRUE WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_all_read(&self, student_id: &str) -> RiskResult<u64> {
        let result = sqlx::query(
            "UPDATE notifications SET read = TRUE WHERE student_id = ? AND read = FALSE",
        )
        .bind(student_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_notification(&self, id: &str) -> RiskResult<bool> {
        let result = sqlx::query("DELETE FROM notifications WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl AttendanceStore for StorageEngine {
    async fn find_attendance(&self, key: &AttendanceKey) -> RiskResult<Option<AttendanceRecord>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM attendance
            WHERE student_id = ? AND subject_id = ? AND period = ? AND class_date = ?
        "#,
        )
        .bind(&key.student_id)
        .bind(&key.subject_id)
        .bind(&key.period)
        .bind(key.class_date)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_attendance).transpose()
    }

    async fn insert_attendance(
        &self,
        key: &AttendanceKey,
        status: AttendanceStatus,
    ) -> RiskResult<AttendanceRecord> {
        let now = Utc::now();
        let record = AttendanceRecord {
            id: Uuid::new_v4().to_string(),
            key: key.clone(),
            status,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO attendance (
                id, student_id, subject_id, period, class_date, status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(&record.id)
        .bind(&key.student_id)
        .bind(&key.subject_id)
        .bind(&key.period)
        .bind(key.class_date)
        .bind(status.as_str())
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            map_unique(
                e,
                format!(
                    "attendance already recorded for {} in {} on {}",
                    key.student_id, key.subject_id, key.class_date
                ),
            )
        })?;

        self.touch(|s| s.attendance_writes += 1).await;
        Ok(record)
    }

    async fn update_attendance_status(
        &self,
        id: &str,
        status: AttendanceStatus,
    ) -> RiskResult<AttendanceRecord> {
        let result = sqlx::query("UPDATE attendance SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RiskError::not_found("Attendance", id));
        }

        self.touch(|s| s.attendance_writes += 1).await;
        self.fetch_attendance_by_id(id).await
    }

    async fn attendance_for_student(&self, student_id: &str) -> RiskResult<Vec<AttendanceRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM attendance WHERE student_id = ? ORDER BY class_date DESC, rowid DESC",
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_attendance).collect()
    }
}

#[async_trait]
impl GradeStore for StorageEngine {
    async fn insert_grade(&self, grade: &Grade) -> RiskResult<()> {
        sqlx::query(
            r#"
            INSERT INTO grades (
                id, student_id, subject_id, period, evaluation_type, grade, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(&grade.id)
        .bind(&grade.student_id)
        .bind(&grade.subject_id)
        .bind(&grade.period)
        .bind(&grade.evaluation_type)
        .bind(grade.grade)
        .bind(grade.created_at)
        .execute(&self.pool)
        .await?;

        self.touch(|s| s.grades_stored += 1).await;
        Ok(())
    }

    async fn update_grade(&self, id: &str, value: f64) -> RiskResult<Grade> {
        let result = sqlx::query("UPDATE grades SET grade = ? WHERE id = ?")
            .bind(value)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RiskError::not_found("Grade", id));
        }

        let row = sqlx::query("SELECT * FROM grades WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        row_to_grade(&row)
    }
}

fn map_unique(err: sqlx::Error, message: String) -> RiskError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => RiskError::Conflict(message),
        _ => RiskError::SqlError(err),
    }
}

fn row_to_assessment(row: &SqliteRow) -> RiskResult<RiskAssessment> {
    let risk_level: String = row.try_get("risk_level")?;
    let state: String = row.try_get("state")?;
    let recommendations: String = row.try_get("recommendations")?;

    Ok(RiskAssessment {
        id: row.try_get("id")?,
        student_id: row.try_get("student_id")?,
        assessed_at: row.try_get("assessed_at")?,
        risk_level: risk_level.parse()?,
        probability: row.try_get("probability")?,
        score: row.try_get("score")?,
        key_factors: row.try_get("key_factors")?,
        recommendations: serde_json::from_str(&recommendations)?,
        state: state.parse()?,
        model: row.try_get("model")?,
        period: row.try_get("period")?,
    })
}

fn row_to_notification(row: &SqliteRow) -> RiskResult<Notification> {
    let kind: String = row.try_get("kind")?;
    let priority: String = row.try_get("priority")?;
    let metadata: String = row.try_get("metadata")?;

    Ok(Notification {
        id: row.try_get("id")?,
        student_id: row.try_get("student_id")?,
        kind: kind.parse()?,
        title: row.try_get("title")?,
        message: row.try_get("message")?,
        priority: priority.parse()?,
        read: row.try_get("read")?,
        metadata: serde_json::from_str(&metadata)?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_grade(row: &SqliteRow) -> RiskResult<Grade> {
    Ok(Grade {
        id: row.try_get("id")?,
        student_id: row.try_get("student_id")?,
        subject_id: row.try_get("subject_id")?,
        period: row.try_get("period")?,
        evaluation_type: row.try_get("evaluation_type")?,
        grade: row.try_get("grade")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_attendance(row: &SqliteRow) -> RiskResult<AttendanceRecord> {
    let status: String = row.try_get("status")?;
    let class_date: NaiveDate = row.try_get("class_date")?;

    Ok(AttendanceRecord {
        id: row.try_get("id")?,
        key: AttendanceKey {
            student_id: row.try_get("student_id")?,
            subject_id: row.try_get("subject_id")?,
            period: row.try_get("period")?,
            class_date,
        },
        status: status.parse()?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

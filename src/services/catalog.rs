use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::test::TestDefinition;

/// Read-only view of the test catalog.
#[async_trait]
pub trait TestCatalog: Send + Sync {
    async fn get_test(&self, test_id: Uuid) -> Result<Option<TestDefinition>>;
}

#[derive(Clone)]
pub struct PgTestCatalog {
    pool: PgPool,
}

impl PgTestCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TestCatalog for PgTestCatalog {
    async fn get_test(&self, test_id: Uuid) -> Result<Option<TestDefinition>> {
        let test = sqlx::query_as::<_, TestDefinition>(
            r#"SELECT id, title, time_limit_minutes, total_questions, is_active
               FROM tests WHERE id = $1"#,
        )
        .bind(test_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(test)
    }
}

/// Map-backed catalog for local runs and tests.
#[derive(Debug, Default)]
pub struct StaticTestCatalog {
    tests: RwLock<HashMap<Uuid, TestDefinition>>,
}

impl StaticTestCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, test: TestDefinition) {
        let mut tests = self.tests.write().unwrap_or_else(|e| e.into_inner());
        tests.insert(test.id, test);
    }

    /// Registers an active test and returns its id.
    pub fn add(&self, title: &str, time_limit_minutes: i32, total_questions: i32) -> Uuid {
        let id = Uuid::new_v4();
        self.insert(TestDefinition {
            id,
            title: title.to_string(),
            time_limit_minutes,
            total_questions,
            is_active: true,
        });
        id
    }
}

#[async_trait]
impl TestCatalog for StaticTestCatalog {
    async fn get_test(&self, test_id: Uuid) -> Result<Option<TestDefinition>> {
        let tests = self
            .tests
            .read()
            .map_err(|_| Error::Internal("test catalog lock poisoned".to_string()))?;
        Ok(tests.get(&test_id).cloned())
    }
}

/// Looks a test up and fails with `NotFound` when the catalog has no such id.
pub async fn require_test(catalog: &dyn TestCatalog, test_id: Uuid) -> Result<TestDefinition> {
    catalog
        .get_test(test_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Test {} not found", test_id)))
}

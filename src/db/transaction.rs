use super::driver::SqlConnection;
use super::error::Result;
use super::query::SqlBuilder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionState {
    #[default]
    Idle,
    InTransaction,
}

/// Makes begin/commit/rollback idempotent on a relational connection.
/// Each method returns whether a native statement was issued.
#[derive(Debug, Default)]
pub struct TransactionGuard {
    state: TransactionState,
}

impl TransactionGuard {
    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub async fn begin(&mut self, conn: &dyn SqlConnection) -> Result<bool> {
        if self.state == TransactionState::InTransaction {
            return Ok(false);
        }
        conn.batch_execute(SqlBuilder::new(conn.dialect()).begin()).await?;
        self.state = TransactionState::InTransaction;
        Ok(true)
    }

    pub async fn commit(&mut self, conn: &dyn SqlConnection) -> Result<bool> {
        if self.state == TransactionState::Idle {
            return Ok(false);
        }
        conn.batch_execute(SqlBuilder::new(conn.dialect()).commit()).await?;
        self.state = TransactionState::Idle;
        Ok(true)
    }

    pub async fn rollback(&mut self, conn: &dyn SqlConnection) -> Result<bool> {
        if self.state == TransactionState::Idle {
            return Ok(false);
        }
        conn.batch_execute(SqlBuilder::new(conn.dialect()).rollback()).await?;
        self.state = TransactionState::Idle;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::Dialect;
    use crate::db::query::CompiledQuery;
    use crate::db::value::Row;
    use async_trait::async_trait;
    use std::any::Any;
    use std::sync::Mutex;

    /// Records the statements it is asked to run
    struct Recorder {
        dialect: Dialect,
        statements: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn new(dialect: Dialect) -> Self {
            Self {
                dialect,
                statements: Mutex::new(Vec::new()),
            }
        }

        fn statements(&self) -> Vec<String> {
            self.statements.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SqlConnection for Recorder {
        fn dialect(&self) -> Dialect {
            self.dialect
        }

        async fn fetch(&self, _query: &CompiledQuery) -> Result<Vec<Row>> {
            Ok(Vec::new())
        }

        async fn execute(&self, _query: &CompiledQuery) -> Result<u64> {
            Ok(0)
        }

        async fn batch_execute(&self, sql: &str) -> Result<()> {
            self.statements.lock().unwrap().push(sql.to_string());
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[tokio::test]
    async fn test_begin_is_idempotent() {
        let conn = Recorder::new(Dialect::MySql);
        let mut guard = TransactionGuard::default();

        assert!(guard.begin(&conn).await.unwrap());
        assert!(!guard.begin(&conn).await.unwrap());
        assert_eq!(guard.state(), TransactionState::InTransaction);

        assert!(guard.commit(&conn).await.unwrap());
        assert_eq!(guard.state(), TransactionState::Idle);
        assert!(!guard.rollback(&conn).await.unwrap());
        assert!(!guard.commit(&conn).await.unwrap());

        assert_eq!(conn.statements(), vec!["START TRANSACTION", "COMMIT"]);
    }

    #[tokio::test]
    async fn test_rollback_per_dialect() {
        let conn = Recorder::new(Dialect::SqlServer);
        let mut guard = TransactionGuard::default();
        guard.begin(&conn).await.unwrap();
        guard.rollback(&conn).await.unwrap();
        assert_eq!(
            conn.statements(),
            vec!["BEGIN TRANSACTION", "ROLLBACK TRANSACTION"]
        );
    }
}

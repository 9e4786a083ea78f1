use thiserror::Error;

pub type Result<T> = std::result::Result<T, MaintError>;

#[derive(Error, Debug)]
pub enum MaintError {
    #[error("Could not look up OID and definition for index: {0}")]
    NotFound(String),

    #[error("Could not parse index definition. Manual reindex required. Definition [{0}]")]
    UnparsableDefinition(String),

    #[error("Can not recreate index {index} for constraint type '{kind}'")]
    UnsupportedConstraintKind { index: String, kind: char },

    #[error(
        "Constraint {constraint} appears to depend on {index}, but do not know how to handle \
         constraint type '{kind}'. Manually rebuilding the index is recommended"
    )]
    UnsupportedDependentKind {
        constraint: String,
        index: String,
        kind: char,
    },

    #[error("Temporary index name {0} collides with the index being rebuilt")]
    TempNameCollision(String),

    #[error("Statement failed [{statement}]: {source}")]
    Execution {
        statement: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MaintError {
    pub fn config(msg: impl Into<String>) -> Self {
        MaintError::Config(msg.into())
    }

    pub fn execution(statement: impl Into<String>, source: sqlx::Error) -> Self {
        MaintError::Execution {
            statement: statement.into(),
            source,
        }
    }

    /// Conditions under which a reindex run stops before touching the
    /// original index and reports zero affected rows instead of failing.
    pub fn is_abort(&self) -> bool {
        matches!(
            self,
            MaintError::NotFound(_)
                | MaintError::UnparsableDefinition(_)
                | MaintError::UnsupportedConstraintKind { .. }
                | MaintError::UnsupportedDependentKind { .. }
                | MaintError::TempNameCollision(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_classification() {
        assert!(MaintError::NotFound("\"public\".\"idx\"".into()).is_abort());
        assert!(MaintError::UnparsableDefinition("CREATE".into()).is_abort());
        assert!(MaintError::UnsupportedConstraintKind {
            index: "idx".into(),
            kind: 'x'
        }
        .is_abort());
        assert!(MaintError::TempNameCollision("tmp_x".into()).is_abort());
        assert!(!MaintError::execution("DROP INDEX x", sqlx::Error::RowNotFound).is_abort());
        assert!(!MaintError::config("bad").is_abort());
    }

    #[test]
    fn test_execution_message_includes_statement() {
        let err = MaintError::execution("VALIDATE CONSTRAINT fk", sqlx::Error::RowNotFound);
        assert!(err.to_string().contains("VALIDATE CONSTRAINT fk"));
    }
}

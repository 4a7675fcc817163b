use thiserror::Error;

/// Every failure the dashboard can report to a user.
///
/// Errors are caught at the boundary of the operation that raised them and
/// rendered as a message; none of them is allowed to stop the server.
#[derive(Error, Debug)]
pub enum DashboardError {
    /// The uploaded file is not a readable spreadsheet or is too short.
    #[error("Failed to load '{file}': {message}")]
    Load { file: String, message: String },

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Column '{column}' not found in {table} (available: {available})")]
    ColumnNotFound {
        table: String,
        column: String,
        available: String,
    },

    #[error("Please upload at least {required} spreadsheet files ({available} loaded)")]
    NotEnoughTables { required: usize, available: usize },

    /// The suggestion endpoint could not be reached.
    #[error("Network error: {0}")]
    Network(String),

    /// The suggestion endpoint answered with a non-success status or an
    /// unreadable body.
    #[error("HTTP error ({status}): {message}")]
    Http { status: u16, message: String },

    #[error("Syntax Error: {message}: `{text}` on line {line}")]
    SnippetSyntax {
        line: usize,
        text: String,
        message: String,
    },

    #[error("Runtime Error: {0}")]
    SnippetRuntime(String),

    #[error("Export failed: {0}")]
    Export(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

pub type Result<T> = std::result::Result<T, DashboardError>;

impl DashboardError {
    pub fn load(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Load {
            file: file.into(),
            message: message.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::SnippetRuntime(message.into())
    }

    /// Whether the error was caused by what the user sent rather than by the
    /// server or a remote service.
    pub fn is_user_error(&self) -> bool {
        !matches!(
            self,
            DashboardError::Network(_)
                | DashboardError::Http { .. }
                | DashboardError::Export(_)
                | DashboardError::Config(_)
        )
    }
}

impl From<rust_xlsxwriter::XlsxError> for DashboardError {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        DashboardError::Export(err.to_string())
    }
}

impl From<csv::Error> for DashboardError {
    fn from(err: csv::Error) -> Self {
        DashboardError::Export(err.to_string())
    }
}

impl From<reqwest::Error> for DashboardError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => DashboardError::Http {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => DashboardError::Network(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syntax_error_names_the_line() {
        let err = DashboardError::SnippetSyntax {
            line: 3,
            text: "print (table(\"a\")".to_string(),
            message: "expected ')'".to_string(),
        };
        let message = err.to_string();
        assert!(message.starts_with("Syntax Error"));
        assert!(message.ends_with("on line 3"));
    }

    #[test]
    fn remote_failures_are_not_user_errors() {
        assert!(!DashboardError::Network("refused".into()).is_user_error());
        assert!(DashboardError::TableNotFound("a.xlsx".into()).is_user_error());
    }
}

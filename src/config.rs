use std::{env::var, path::PathBuf};

use anyhow::{bail, Context};
use tracing::warn;

use crate::models::StudentId;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Backend {
    Postgres { database_url: String },
    Sheets { dir: PathBuf },
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Postgres { .. } => "postgres",
            Backend::Sheets { .. } => "sheets",
        }
    }
}

#[derive(Clone, Debug)]
pub struct EnvVars {
    pub backend: Backend,
    pub default_student_id: StudentId,
    pub port: u16,
    pub request_body_size_limit: usize,
    pub request_timeout_in_ms: u64,
    pub seed_on_startup: bool,
}

impl EnvVars {
    pub fn new() -> anyhow::Result<Self> {
        let backend = match var("ATHENA_BACKEND") {
            Ok(v) => match v.to_lowercase().as_str() {
                "postgres" => {
                    let database_url = var("DATABASE_URL")
                        .context("DATABASE_URL must be set when ATHENA_BACKEND=postgres")?;
                    if database_url.is_empty() {
                        bail!("DATABASE_URL must not be empty");
                    }
                    Backend::Postgres { database_url }
                }
                "sheets" => Backend::Sheets { dir: sheets_dir() },
                other => {
                    warn!("ATHENA_BACKEND value '{other}' is not valid. Defaulting to 'sheets'.");
                    Backend::Sheets { dir: sheets_dir() }
                }
            },
            Err(_e) => {
                warn!("ATHENA_BACKEND not set. Defaulting to 'sheets'.");
                Backend::Sheets { dir: sheets_dir() }
            }
        };

        let default_student_id = match var("DEFAULT_STUDENT_ID") {
            Ok(s) if !s.is_empty() => StudentId::new(s),
            _ => {
                let default_student_id = "MOCK_STUDENT_123";
                warn!("DEFAULT_STUDENT_ID not set. Defaulting to {default_student_id}");
                StudentId::new(default_student_id)
            }
        };

        let port = match var("PORT") {
            Ok(port_string) => port_string
                .parse()
                .context("PORT to be parseable as u16")?,
            Err(_e) => {
                let default_port = 8000;
                warn!("PORT not set. Defaulting to {default_port}");
                default_port
            }
        };

        let request_timeout_in_ms = match var("REQUEST_TIMEOUT_IN_MS") {
            Ok(s) => s
                .parse()
                .context("REQUEST_TIMEOUT_IN_MS to be valid unsigned integer")?,
            Err(_e) => {
                let default_request_timeout = 30_000;
                warn!("REQUEST_TIMEOUT_IN_MS not set. Defaulting to {default_request_timeout}");
                default_request_timeout
            }
        };

        let request_body_size_limit = match var("REQUEST_BODY_SIZE_LIMIT") {
            Ok(s) => s
                .parse()
                .context("REQUEST_BODY_SIZE_LIMIT to be valid unsigned integer")?,
            Err(_e) => {
                let default_request_body_size_limit = 1 << 20;
                warn!(
                    "REQUEST_BODY_SIZE_LIMIT not set. Defaulting to {default_request_body_size_limit}"
                );
                default_request_body_size_limit
            }
        };

        let seed_on_startup = match var("SEED_ON_STARTUP") {
            Ok(s) => parse_flag(&s).with_context(|| {
                format!("SEED_ON_STARTUP should be true or false, got '{s}'")
            })?,
            Err(_e) => true,
        };

        Ok(EnvVars {
            backend,
            default_student_id,
            port,
            request_body_size_limit,
            request_timeout_in_ms,
            seed_on_startup,
        })
    }
}

fn sheets_dir() -> PathBuf {
    match var("SHEETS_DIR") {
        Ok(s) if !s.is_empty() => PathBuf::from(s),
        _ => {
            let default_dir = "./athena-sheets";
            warn!("SHEETS_DIR not set. Defaulting to {default_dir}");
            PathBuf::from(default_dir)
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_accept_common_spellings() {
        assert_eq!(parse_flag("true"), Some(true));
        assert_eq!(parse_flag(" Yes "), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("off"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}

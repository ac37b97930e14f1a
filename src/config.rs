//! Environment-sourced configuration, read once at startup.

use crate::utils::{read_env_variable, read_env_variable_with_default_value, read_optional_env_variable};

const MONGO_URI_ENV_KEY: &str = "MONGO_URI";
const API_PORT_ENV_KEY: &str = "API_PORT";
const API_KEY_ENV_KEY: &str = "API_KEY";
const LOGS_DIR_ENV_KEY: &str = "LOGS_DIR";
const TCP_PORT_ENV_KEY: &str = "TCP_PORT";

const DEFAULT_API_PORT: u16 = 3000;
const DEFAULT_TCP_PORT: u16 = 5027;
const DEFAULT_LOGS_DIR: &str = "logs";

#[derive(Debug, Clone)]
pub struct Config {
    pub mongo_uri: String,
    pub api_port: u16,
    pub api_key: String,
    pub logs_dir: String,
    pub tcp_port: u16,
}

impl Config {
    /// Reads configuration from the environment.
    ///
    /// Panics if `MONGO_URI` or `API_KEY` are unset; other settings fall
    /// back to sane defaults.
    pub fn from_env() -> Self {
        Config {
            mongo_uri: read_env_variable::<String>(MONGO_URI_ENV_KEY),
            api_key: read_env_variable::<String>(API_KEY_ENV_KEY),
            api_port: read_env_variable_with_default_value(API_PORT_ENV_KEY, DEFAULT_API_PORT),
            logs_dir: read_optional_env_variable(LOGS_DIR_ENV_KEY).unwrap_or_else(|| DEFAULT_LOGS_DIR.to_string()),
            tcp_port: read_env_variable_with_default_value(TCP_PORT_ENV_KEY, DEFAULT_TCP_PORT),
        }
    }
}

use std::str::FromStr;

#[cfg(test)]
pub mod imei;

/// Reads environment variable and parses it to the desired type
///
/// Panics if the environment variable is not set
///
/// # Arguments
/// * `key` - The environment variable key
///
/// # Returns
/// * `T` - The parsed environment variable
pub fn read_env_variable<T: FromStr>(key: &str) -> T {
    match std::env::var(key) {
        Ok(value) => parse_env_variable(value),
        Err(_) => panic!("{} environment variable not set", key),
    }
}

/// Reads environment variable and parses it to the desired type wrapped in an Option
///
/// # Arguments
/// * `key` - The environment variable key
///
/// # Returns
/// * `Option<T>` - The parsed environment variable
pub fn read_optional_env_variable<T: FromStr>(key: &str) -> Option<T> {
    match std::env::var(key) {
        Ok(value) => Some(parse_env_variable(value)),
        Err(_) => None,
    }
}

/// Parses an environment variable to the desired type
///
/// Panics if the parsing fails
///
/// # Arguments
/// * `value` - The environment variable value
fn parse_env_variable<T: FromStr>(value: String) -> T {
    match value.parse() {
        Ok(parsed) => parsed,
        Err(_) => panic!("Failed to parse environment variable"),
    }
}

/// Reads environment variable and parses it to the desired type with a default value
///
/// If the environment variable is not set, the default value is returned.
///
/// # Arguments
/// * `key` - The environment variable key
/// * `default_value` - The default value
///
/// # Returns
/// * `T` - The parsed environment variable or the default value
pub fn read_env_variable_with_default_value<T: FromStr>(key: &str, default_value: T) -> T {
    match read_optional_env_variable(key) {
        Some(value) => value,
        None => default_value,
    }
}


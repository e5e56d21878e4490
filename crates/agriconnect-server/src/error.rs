use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// Environment variable that sets a dotted configuration path, e.g.
/// `provider.api_key` -> `AGRICONNECT_PROVIDER__API_KEY`
pub fn to_env_var(field_path: &str) -> String {
    format!(
        "AGRICONNECT_{}",
        field_path.to_uppercase().replace('.', "__")
    )
}

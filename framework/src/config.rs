use std::path::Path;

use serde::de::DeserializeOwned;

pub use config::ConfigError;

/// Load a configuration struct from the environment, optionally layered over a file.
///
/// Nested keys use `__`: with prefix `MAIL`, `MAIL_MAILERS__SMTP__DSN` sets
/// `mailers.smtp.dsn`. A `.env` file in the working directory is loaded first when
/// present.
pub trait EnvConfig: Sized {
    fn from_env() -> Result<Self, ConfigError>;
    fn from_env_with_prefix(prefix: &str) -> Result<Self, ConfigError>;
    /// Read `path` (TOML, YAML or JSON by extension), then overlay the prefixed environment.
    fn from_file(path: impl AsRef<Path>, prefix: &str) -> Result<Self, ConfigError>;
}

impl<D> EnvConfig for D
where
    D: DeserializeOwned,
{
    fn from_env() -> Result<Self, ConfigError> {
        load(None, None)
    }

    fn from_env_with_prefix(prefix: &str) -> Result<Self, ConfigError> {
        load(None, Some(prefix))
    }

    fn from_file(path: impl AsRef<Path>, prefix: &str) -> Result<Self, ConfigError> {
        load(Some(path.as_ref()), Some(prefix))
    }
}

fn load<D: DeserializeOwned>(file: Option<&Path>, prefix: Option<&str>) -> Result<D, ConfigError> {
    // A missing .env is normal outside development.
    dotenvy::dotenv().ok();

    let environment = match prefix {
        Some(prefix) => config::Environment::with_prefix(prefix).prefix_separator("_"),
        None => config::Environment::default(),
    }
    .separator("__")
    .try_parsing(true);

    let mut builder = config::Config::builder();
    if let Some(file) = file {
        builder = builder.add_source(config::File::from(file));
    }
    builder.add_source(environment).build()?.try_deserialize()
}

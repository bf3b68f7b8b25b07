mod parsing;
mod secret;
mod settings;
mod types;

pub(crate) use types::{
    ApiSettings, ConfigError, CorsSettings, DatabaseSettings, Environment, FanoutSettings,
    JudgeSettings, QuizSettings, RedisSettings, RuntimeSettings, SecuritySettings, Settings,
    TelemetrySettings,
};

use super::parsing::{
    env_optional, env_or_default, parse_bool, parse_cors_origins, parse_environment, parse_f64,
    parse_i64, parse_u16, parse_u32, parse_u64, parse_usize,
};
use super::secret::load_or_create_secret_key;
use super::types::{
    ApiSettings, ConfigError, CorsSettings, DatabaseSettings, FanoutSettings, JudgeSettings,
    QuizSettings, RedisSettings, RuntimeSettings, SecuritySettings, ServerHost, ServerPort,
    ServerSettings, Settings, TelemetrySettings,
};

const MAX_SUBMIT_GRACE_SECONDS: i64 = 7 * 24 * 60 * 60;
const MAX_JUDGE_RETRIES: u32 = 10;

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("QUIZGRADE_HOST", "0.0.0.0");
        let port = env_or_default("QUIZGRADE_PORT", "8000");

        let environment = parse_environment(
            env_optional("QUIZGRADE_ENV").or_else(|| env_optional("ENVIRONMENT")),
        );
        let strict_config = env_optional("QUIZGRADE_STRICT_CONFIG")
            .map(|value| parse_bool(&value))
            .unwrap_or(false)
            || environment.is_production();

        let project_name = env_or_default("PROJECT_NAME", "Quizgrade API");
        let version = env_or_default("VERSION", env!("CARGO_PKG_VERSION"));
        let api_v1_str = env_or_default("API_V1_STR", "/api/v1");

        let secret_key = match env_optional("SECRET_KEY") {
            Some(value) => value,
            None if strict_config => return Err(ConfigError::MissingSecret("SECRET_KEY")),
            None => load_or_create_secret_key(),
        };
        let access_token_expire_minutes = parse_u64(
            "ACCESS_TOKEN_EXPIRE_MINUTES",
            env_or_default("ACCESS_TOKEN_EXPIRE_MINUTES", "10080"),
        )?;
        let algorithm = env_or_default("ALGORITHM", "HS256");

        let cors_origins = parse_cors_origins(env_optional("BACKEND_CORS_ORIGINS"))?;

        let postgres_server = env_or_default("POSTGRES_SERVER", "localhost");
        let postgres_port = parse_u16("POSTGRES_PORT", env_or_default("POSTGRES_PORT", "5432"))?;
        let postgres_user = env_or_default("POSTGRES_USER", "quizgrade");
        let postgres_password = env_or_default("POSTGRES_PASSWORD", "");
        let postgres_db = env_or_default("POSTGRES_DB", "quizgrade_db");
        let database_url = env_optional("DATABASE_URL");
        let max_connections =
            parse_u32("DB_MAX_CONNECTIONS", env_or_default("DB_MAX_CONNECTIONS", "30"))?;

        let redis_host = env_or_default("REDIS_HOST", "localhost");
        let redis_port = parse_u16("REDIS_PORT", env_or_default("REDIS_PORT", "6379"))?;
        let redis_db = parse_u16("REDIS_DB", env_or_default("REDIS_DB", "0"))?;
        let redis_password = env_or_default("REDIS_PASSWORD", "");

        let judge_api_key = env_or_default("JUDGE_API_KEY", "");
        let judge_base_url = env_or_default("JUDGE_BASE_URL", "https://api.openai.com/v1");
        let judge_model = env_or_default("JUDGE_MODEL", "gpt-4o-mini");
        let judge_max_tokens =
            parse_u32("JUDGE_MAX_TOKENS", env_or_default("JUDGE_MAX_TOKENS", "512"))?;
        let judge_temperature =
            parse_f64("JUDGE_TEMPERATURE", env_or_default("JUDGE_TEMPERATURE", "0.2"))?;
        let judge_request_timeout_seconds = parse_u64(
            "JUDGE_REQUEST_TIMEOUT_SECONDS",
            env_or_default("JUDGE_REQUEST_TIMEOUT_SECONDS", "30"),
        )?;
        let judge_max_retries =
            parse_u32("JUDGE_MAX_RETRIES", env_or_default("JUDGE_MAX_RETRIES", "2"))?;

        let submit_grace_seconds = parse_i64(
            "QUIZ_SUBMIT_GRACE_SECONDS",
            env_or_default("QUIZ_SUBMIT_GRACE_SECONDS", "300"),
        )?;
        let max_integrity_event_len = parse_usize(
            "QUIZ_MAX_INTEGRITY_EVENT_LEN",
            env_or_default("QUIZ_MAX_INTEGRITY_EVENT_LEN", "200"),
        )?;

        let channel_capacity = parse_usize(
            "FANOUT_CHANNEL_CAPACITY",
            env_or_default("FANOUT_CHANNEL_CAPACITY", "256"),
        )?;
        let redis_channel_prefix = env_or_default("FANOUT_REDIS_PREFIX", "quiz-events");

        let log_level = env_or_default("QUIZGRADE_LOG_LEVEL", "info");
        let json = env_optional("QUIZGRADE_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { project_name, version, api_v1_str },
            security: SecuritySettings { secret_key, access_token_expire_minutes, algorithm },
            cors: CorsSettings { origins: cors_origins },
            database: DatabaseSettings {
                postgres_server,
                postgres_port,
                postgres_user,
                postgres_password,
                postgres_db,
                database_url,
                max_connections,
            },
            redis: RedisSettings {
                host: redis_host,
                port: redis_port,
                db: redis_db,
                password: redis_password,
            },
            judge: JudgeSettings {
                api_key: judge_api_key,
                base_url: judge_base_url,
                model: judge_model,
                max_tokens: judge_max_tokens,
                temperature: judge_temperature,
                request_timeout_seconds: judge_request_timeout_seconds,
                max_retries: judge_max_retries,
            },
            quiz: QuizSettings { submit_grace_seconds, max_integrity_event_len },
            fanout: FanoutSettings { channel_capacity, redis_channel_prefix },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn security(&self) -> &SecuritySettings {
        &self.security
    }

    pub(crate) fn cors(&self) -> &CorsSettings {
        &self.cors
    }

    pub(crate) fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub(crate) fn redis(&self) -> &RedisSettings {
        &self.redis
    }

    pub(crate) fn judge(&self) -> &JudgeSettings {
        &self.judge
    }

    pub(crate) fn quiz(&self) -> &QuizSettings {
        &self.quiz
    }

    pub(crate) fn fanout(&self) -> &FanoutSettings {
        &self.fanout
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0..=MAX_SUBMIT_GRACE_SECONDS).contains(&self.quiz.submit_grace_seconds) {
            return Err(ConfigError::InvalidValue {
                field: "QUIZ_SUBMIT_GRACE_SECONDS",
                value: self.quiz.submit_grace_seconds.to_string(),
            });
        }

        if self.quiz.max_integrity_event_len == 0 {
            return Err(ConfigError::InvalidValue {
                field: "QUIZ_MAX_INTEGRITY_EVENT_LEN",
                value: "0".to_string(),
            });
        }

        if self.fanout.channel_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "FANOUT_CHANNEL_CAPACITY",
                value: "0".to_string(),
            });
        }

        if self.judge.max_retries > MAX_JUDGE_RETRIES {
            return Err(ConfigError::InvalidValue {
                field: "JUDGE_MAX_RETRIES",
                value: self.judge.max_retries.to_string(),
            });
        }

        if self.judge.request_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "JUDGE_REQUEST_TIMEOUT_SECONDS",
                value: "0".to_string(),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.database.database_url.is_none() && self.database.postgres_password.is_empty() {
            return Err(ConfigError::MissingSecret("POSTGRES_PASSWORD"));
        }
        if !self.judge.is_configured() {
            tracing::warn!("JUDGE_API_KEY not configured; essay answers will receive fallback grades");
        }

        Ok(())
    }
}

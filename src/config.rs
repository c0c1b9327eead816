use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    /// `None` when `JWT_SECRET` is unset or blank.
    pub secret: Option<String>,
    pub issuer: String,
    pub audience: String,
}

/// Argon2 work factor.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct HashingConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            memory_kib: argon2::Params::DEFAULT_M_COST,
            iterations: argon2::Params::DEFAULT_T_COST,
            parallelism: argon2::Params::DEFAULT_P_COST,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub jwt: JwtConfig,
    pub hashing: HashingConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = non_blank_var("DATABASE_URL");
        let jwt = JwtConfig {
            secret: non_blank_var("JWT_SECRET"),
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "storefront".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "storefront-users".into()),
        };
        let defaults = HashingConfig::default();
        let hashing = HashingConfig {
            memory_kib: parsed_var("ARGON2_MEMORY_KIB").unwrap_or(defaults.memory_kib),
            iterations: parsed_var("ARGON2_ITERATIONS").unwrap_or(defaults.iterations),
            parallelism: parsed_var("ARGON2_PARALLELISM").unwrap_or(defaults.parallelism),
        };
        Ok(Self {
            database_url,
            jwt,
            hashing,
        })
    }
}

fn non_blank_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parsed_var(key: &str) -> Option<u32> {
    std::env::var(key).ok().and_then(|v| v.parse::<u32>().ok())
}

use std::path::PathBuf;
use std::time::Duration;

/// AEAT 环境
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifactuEnv {
    /// 预生产 (prewww1)
    Test,
    Production,
}

impl VerifactuEnv {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" | "produccion" => Self::Production,
            _ => Self::Test,
        }
    }

    /// SOAP endpoint for RegFactuSistemaFacturacion
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            Self::Test => {
                "https://prewww1.aeat.es/wlpl/TIKE-CONT/ws/SistemaFacturacion/VerifactuSOAP"
            }
            Self::Production => {
                "https://www1.agenciatributaria.gob.es/wlpl/TIKE-CONT/ws/SistemaFacturacion/VerifactuSOAP"
            }
        }
    }

    /// Public lookup printed in the QR code
    pub fn qr_base_url(&self) -> &'static str {
        match self {
            Self::Test => "https://prewww1.aeat.es/wlpl/TIKE-CONT/ValidarQR",
            Self::Production => "https://www2.agenciatributaria.gob.es/wlpl/TIKE-CONT/ValidarQR",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Test => "test",
            Self::Production => "production",
        }
    }
}

/// SistemaInformatico block of every filing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftwareInfo {
    /// NombreSistemaInformatico
    pub name: String,
    /// IdSistemaInformatico (2 chars assigned by the vendor)
    pub id: String,
    pub version: String,
    /// Producer of the software
    pub vendor_name: String,
    pub vendor_nif: String,
    pub installation_number: String,
}

impl SoftwareInfo {
    fn from_env() -> Self {
        Self {
            name: env_or("SOFTWARE_NAME", "Piano Verifactu"),
            id: env_or("SOFTWARE_ID", "PV"),
            version: env_or("SOFTWARE_VERSION", env!("CARGO_PKG_VERSION")),
            vendor_name: env_or("SOFTWARE_VENDOR_NAME", "Piano Emotion Manager"),
            vendor_nif: env_or("SOFTWARE_VENDOR_NIF", "B00000000"),
            installation_number: env_or("SOFTWARE_INSTALLATION", "1"),
        }
    }
}

/// 服务配置
///
/// # 环境变量
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | WORK_DIR | /var/lib/verifactu | 工作目录 (数据库、证书、日志) |
/// | HTTP_PORT | 3000 | HTTP 服务端口 |
/// | ENVIRONMENT | development | 运行环境 |
/// | VERIFACTU_ENV | test | AEAT 环境: test / production |
/// | AEAT_ENDPOINT | 按 VERIFACTU_ENV | SOAP 端点覆盖 |
/// | QR_BASE_URL | 按 VERIFACTU_ENV | 二维码校验 URL 覆盖 |
/// | SIGNING_REQUIRED | true | 无证书时是否阻断定稿 |
/// | AUTO_SUBMIT | false | 定稿后自动提交 |
/// | SUBMISSION_TIMEOUT_SECS | 30 | 单次提交超时 |
/// | SUBMISSION_SWEEP_SECS | 300 | 重扫 pending/error 的间隔 |
/// | CHAIN_VERIFY_INTERVAL_SECS | 3600 | 定时校验哈希链的间隔 (0 关闭) |
/// | VERIFACTU_P12_PASSWORD | - | PKCS#12 证书密码 |
/// | VERIFY_P12_CHAIN | false | 要求 P12 由 AEAT 认可的 CA 签发 |
/// | LOG_LEVEL | info | 日志级别 |
/// | LOG_JSON | false | JSON 日志 |
/// | SOFTWARE_NAME / SOFTWARE_ID / SOFTWARE_VERSION | - | SistemaInformatico |
/// | SOFTWARE_VENDOR_NAME / SOFTWARE_VENDOR_NIF / SOFTWARE_INSTALLATION | - | SistemaInformatico |
///
/// # 示例
///
/// ```ignore
/// WORK_DIR=/data/verifactu VERIFACTU_ENV=production AUTO_SUBMIT=true cargo run
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// 工作目录
    pub work_dir: String,
    pub http_port: u16,
    /// development | staging | production
    pub environment: String,
    pub verifactu_env: VerifactuEnv,
    pub aeat_endpoint: String,
    pub qr_base_url: String,
    /// 无证书时阻断定稿 (过期证书总是阻断)
    pub signing_required: bool,
    pub auto_submit: bool,
    pub submission_timeout_secs: u64,
    pub submission_sweep_secs: u64,
    /// 重扫自动重发的尝试上限
    pub submission_max_attempts: i64,
    pub chain_verify_interval_secs: u64,
    pub p12_password: Option<String>,
    pub verify_p12_chain: bool,
    pub log_level: String,
    pub log_json: bool,
    pub software: SoftwareInfo,
}

impl Config {
    /// 从环境变量加载配置
    ///
    /// 未设置或无法解析的值使用默认值
    pub fn from_env() -> Self {
        let verifactu_env = VerifactuEnv::parse(&env_or("VERIFACTU_ENV", "test"));
        Self {
            work_dir: env_or("WORK_DIR", "/var/lib/verifactu"),
            http_port: env_parse("HTTP_PORT", 3000),
            environment: env_or("ENVIRONMENT", "development"),
            verifactu_env,
            aeat_endpoint: env_or("AEAT_ENDPOINT", verifactu_env.default_endpoint()),
            qr_base_url: env_or("QR_BASE_URL", verifactu_env.qr_base_url()),
            signing_required: env_parse("SIGNING_REQUIRED", true),
            auto_submit: env_parse("AUTO_SUBMIT", false),
            submission_timeout_secs: env_parse("SUBMISSION_TIMEOUT_SECS", 30),
            submission_sweep_secs: env_parse("SUBMISSION_SWEEP_SECS", 300),
            submission_max_attempts: env_parse("SUBMISSION_MAX_ATTEMPTS", 30),
            chain_verify_interval_secs: env_parse("CHAIN_VERIFY_INTERVAL_SECS", 3600),
            p12_password: std::env::var("VERIFACTU_P12_PASSWORD").ok(),
            verify_p12_chain: env_parse("VERIFY_P12_CHAIN", false),
            log_level: env_or("LOG_LEVEL", "info"),
            log_json: env_parse("LOG_JSON", false),
            software: SoftwareInfo::from_env(),
        }
    }

    /// 测试用: 指定工作目录，其余取默认值
    pub fn with_work_dir(work_dir: impl Into<String>) -> Self {
        let mut config = Self::from_env();
        config.work_dir = work_dir.into();
        config
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("database").join("verifactu.db")
    }

    /// `{work_dir}/certs/{org_id}/...`
    pub fn certs_dir(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("certs")
    }

    pub fn log_dir(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("logs")
    }

    pub fn submission_timeout(&self) -> Duration {
        Duration::from_secs(self.submission_timeout_secs.max(1))
    }

    /// 创建工作目录结构
    pub fn ensure_work_dir_structure(&self) -> std::io::Result<()> {
        for dir in [
            self.database_path().parent().map(PathBuf::from),
            Some(self.certs_dir()),
            Some(self.log_dir()),
        ]
        .into_iter()
        .flatten()
        {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.into())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

//! Configuration management via environment variables
//!
//! ワーカープールと子プロセスの設定を `WHISPERLB_*` 環境変数から読み込む。

use serde::{Deserialize, Serialize};

/// Get an environment variable with a default value.
pub fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Get an environment variable, parsing to a specific type.
///
/// Returns the default when the variable is unset or fails to parse.
pub fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// ワーカープール設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// プールサイズ（同時に維持するワーカー数、デフォルト: 2）
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// ローテーション閾値（このリクエスト数を処理したワーカーは交代、デフォルト: 50）
    #[serde(default = "default_rotate_threshold")]
    pub rotate_threshold: u64,

    /// ワーカーの先頭ポート番号（デフォルト: 8081）
    #[serde(default = "default_starting_port")]
    pub starting_port: u16,

    /// whisper-server起動コマンド（空白区切り、先頭トークンが実行ファイル）
    #[serde(default)]
    pub server_cmd: String,

    /// 子プロセスの作業ディレクトリ（空のときはプロセスのcwd）
    #[serde(default)]
    pub server_cwd: String,

    /// `--model` に渡すモデルパス（空のときは渡さない）
    #[serde(default)]
    pub server_model: String,

    /// `--threads` に渡すスレッド数（0のときは渡さない）
    #[serde(default)]
    pub server_threads: u32,

    /// 追加引数（空白区切りの自由書式）
    #[serde(default)]
    pub server_args: String,

    /// ワーカーの標準出力/標準エラーを書き出すディレクトリ
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

fn default_pool_size() -> usize {
    2
}

fn default_rotate_threshold() -> u64 {
    50
}

fn default_starting_port() -> u16 {
    8081
}

fn default_log_dir() -> String {
    std::env::temp_dir()
        .join("whisperlb")
        .to_string_lossy()
        .into_owned()
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            rotate_threshold: default_rotate_threshold(),
            starting_port: default_starting_port(),
            server_cmd: String::new(),
            server_cwd: String::new(),
            server_model: String::new(),
            server_threads: 0,
            server_args: String::new(),
            log_dir: default_log_dir(),
        }
    }
}

impl PoolConfig {
    /// 環境変数から設定を読み込む
    pub fn from_env() -> Self {
        Self {
            pool_size: env_parse("WHISPERLB_POOL_SIZE", default_pool_size()),
            rotate_threshold: env_parse("WHISPERLB_ROTATE_THRESHOLD", default_rotate_threshold()),
            starting_port: env_parse("WHISPERLB_STARTING_PORT", default_starting_port()),
            server_cmd: env_or("WHISPERLB_SERVER_CMD", ""),
            server_cwd: env_or("WHISPERLB_SERVER_CWD", ""),
            server_model: env_or("WHISPERLB_SERVER_MODEL", ""),
            server_threads: env_parse("WHISPERLB_SERVER_THREADS", 0),
            server_args: env_or("WHISPERLB_SERVER_ARGS", ""),
            log_dir: env_or("WHISPERLB_LOG_DIR", &default_log_dir()),
        }
    }

    /// プールが使用するポート範囲を返す
    ///
    /// `[starting_port, starting_port + pool_size)`。u16の上限を越える分は
    /// 切り捨てる。
    pub fn ports(&self) -> impl Iterator<Item = u16> + '_ {
        let start = self.starting_port as u32;
        (0..self.pool_size as u32)
            .map(move |i| start + i)
            .take_while(|p| *p <= u16::MAX as u32)
            .map(|p| p as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_defaults() {
        let config = PoolConfig::default();

        assert_eq!(config.pool_size, 2);
        assert_eq!(config.rotate_threshold, 50);
        assert_eq!(config.starting_port, 8081);
        assert!(config.server_cmd.is_empty());
        assert!(config.server_cwd.is_empty());
        assert_eq!(config.server_threads, 0);
    }

    #[test]
    fn test_pool_config_deserialization() {
        let json = r#"{"pool_size":4,"server_cmd":"/opt/whisper/server"}"#;
        let config: PoolConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.pool_size, 4);
        assert_eq!(config.server_cmd, "/opt/whisper/server");
        // デフォルト値が適用される
        assert_eq!(config.starting_port, 8081);
        assert_eq!(config.rotate_threshold, 50);
    }

    #[test]
    fn test_ports_range() {
        let config = PoolConfig {
            starting_port: 9000,
            pool_size: 3,
            ..Default::default()
        };

        let ports: Vec<u16> = config.ports().collect();
        assert_eq!(ports, vec![9000, 9001, 9002]);
    }

    #[test]
    fn test_ports_range_clamped_at_u16_max() {
        let config = PoolConfig {
            starting_port: u16::MAX - 1,
            pool_size: 4,
            ..Default::default()
        };

        let ports: Vec<u16> = config.ports().collect();
        assert_eq!(ports, vec![u16::MAX - 1, u16::MAX]);
    }

    #[test]
    fn test_env_parse_falls_back_on_garbage() {
        // 存在しない変数はデフォルト
        assert_eq!(env_parse("WHISPERLB_TEST_UNSET_VAR", 7u16), 7);
    }
}

//! Default values and functions for configuration

use std::path::PathBuf;

// Default constants
pub(crate) const DEFAULT_MODEL: &str = "clip-ViT-L-14-336";
pub(crate) const DEFAULT_INDEX_PREFIX: &str = "./imageindex";
pub(crate) const DEFAULT_STATE_FILE: &str = "./imageindex.state.json";
pub(crate) const DEFAULT_PARTIALS_DIR: &str = "./partials";
pub(crate) const DEFAULT_WORK_DIR: &str = "./work";
pub(crate) const DEFAULT_REMOTE_USER: &str = "root";
pub(crate) const DEFAULT_REMOTE_WORK_DIR: &str = "/root/ImageRecognition";
pub(crate) const DEFAULT_WORKER_SCRIPT: &str = "./worker_index.py";
pub(crate) const DEFAULT_PYTHON: &str = "venv/bin/python";
pub(crate) const DEFAULT_RESULTS_DIR: &str = "./image_results";
pub(crate) const DEFAULT_QUERY_SCRIPT: &str = "remote_query.py";
pub(crate) const DEFAULT_SERVER_HOST: &str = "0.0.0.0";

pub(crate) fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

pub(crate) fn default_embedding_dim() -> usize {
    768
}

pub(crate) fn default_index_prefix() -> PathBuf {
    PathBuf::from(DEFAULT_INDEX_PREFIX)
}

pub(crate) fn default_state_file() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_FILE)
}

pub(crate) fn default_partials_dir() -> PathBuf {
    PathBuf::from(DEFAULT_PARTIALS_DIR)
}

pub(crate) fn default_work_dir() -> PathBuf {
    PathBuf::from(DEFAULT_WORK_DIR)
}

pub(crate) fn default_batch_size() -> usize {
    8
}

pub(crate) fn default_remote_user() -> String {
    DEFAULT_REMOTE_USER.to_string()
}

pub(crate) fn default_remote_work_dir() -> String {
    DEFAULT_REMOTE_WORK_DIR.to_string()
}

pub(crate) fn default_worker_script() -> PathBuf {
    PathBuf::from(DEFAULT_WORKER_SCRIPT)
}

pub(crate) fn default_python() -> String {
    DEFAULT_PYTHON.to_string()
}

pub(crate) fn default_ssh_options() -> Vec<String> {
    vec!["-o".to_string(), "StrictHostKeyChecking=no".to_string()]
}

pub(crate) fn default_poll_interval_ms() -> u64 {
    10_000
}

/// Zero disables the monitor timeout
pub(crate) fn default_monitor_timeout_secs() -> u64 {
    0
}

pub(crate) fn default_results_dir() -> PathBuf {
    PathBuf::from(DEFAULT_RESULTS_DIR)
}

pub(crate) fn default_top_k() -> usize {
    10
}

pub(crate) fn default_query_script() -> String {
    DEFAULT_QUERY_SCRIPT.to_string()
}

pub(crate) fn default_server_host() -> String {
    DEFAULT_SERVER_HOST.to_string()
}

pub(crate) fn default_server_port() -> u16 {
    8000
}

pub(crate) fn default_require_auth() -> bool {
    true
}

pub(crate) fn default_allowed_origins() -> Vec<String> {
    Vec::new() // Empty by default = CORS disabled
}

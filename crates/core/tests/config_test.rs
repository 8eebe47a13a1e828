use fleetindex_core::config::Config;
use fleetindex_core::NodeSpec;

#[test]
fn test_config_defaults() {
    let config = Config::default();
    assert_eq!(config.index.model_name, "clip-ViT-L-14-336");
    assert_eq!(config.index.embedding_dim, 768);
    assert_eq!(config.remote.user, "root");
    assert_eq!(config.remote.work_dir, "/root/ImageRecognition");
    assert_eq!(
        config.remote.ssh_options,
        vec!["-o".to_string(), "StrictHostKeyChecking=no".to_string()]
    );
    assert_eq!(config.monitor.poll_interval_ms, 10_000);
    assert_eq!(config.server.port, 8000);
    assert!(config.server.require_auth);
    assert!(config.nodes.is_empty());
}

#[test]
fn test_full_config_parses() {
    let toml = r#"
        [index]
        prefix = "/srv/fleet/imageindex"
        state_file = "/srv/fleet/imageindex.state.json"
        partials_dir = "/srv/fleet/partials"
        model_name = "clip-ViT-L-14"
        embedding_dim = 768

        [[nodes]]
        hostname = "gpu-small"
        weight = 0.2
        batch_size = 2
        ram_gb = 16

        [[nodes]]
        hostname = "gpu-large"
        weight = 0.8
        batch_size = 16
        ram_gb = 128

        [remote]
        user = "embed"
        work_dir = "/opt/fleet"
        local_root = "/Volumes/photos"
        remote_root = "/mnt/photos"

        [dispatch]
        cancel_on_failure = true

        [monitor]
        poll_interval_ms = 500
        timeout_secs = 3600

        [query]
        node = "gpu-large"
        default_top_k = 5

        [server]
        port = 9100
        api_keys = ["alpha", "beta"]
        allowed_origins = ["http://localhost:3000"]
    "#;

    let config = Config::from_toml_str(toml).expect("Failed to parse config");
    config.validate().expect("Config should be valid");

    assert_eq!(config.remote.user, "embed");
    assert!(config.dispatch.cancel_on_failure);
    assert_eq!(config.monitor.timeout_secs, 3600);
    assert_eq!(config.query.default_top_k, 5);
    assert_eq!(config.server.api_keys.len(), 2);

    let nodes = NodeSpec::from_config(&config);
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0].id, 0);
    assert_eq!(nodes[1].hostname, "gpu-large");
    assert_eq!(nodes[1].model, "clip-ViT-L-14");
}

#[test]
fn test_zero_embedding_dim_rejected() {
    let toml = r#"
        [index]
        embedding_dim = 0

        [[nodes]]
        hostname = "solo"
        weight = 1.0

        [server]
        require_auth = false
    "#;

    let config = Config::from_toml_str(toml).expect("Failed to parse config");
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("embedding_dim"));
}

#[test]
fn test_zero_batch_size_rejected() {
    let toml = r#"
        [[nodes]]
        hostname = "solo"
        weight = 1.0
        batch_size = 0

        [server]
        require_auth = false
    "#;

    let config = Config::from_toml_str(toml).expect("Failed to parse config");
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("batch_size"));
}

//! Coverage for config parsing, validation and password resolution.

use std::path::Path;
use std::time::Duration;

use vxwhatsapp::config::{
    config_dir, decode_password, load_config, resolve_password, Config, CorrelationBackendKind,
};

fn parse(toml_str: &str) -> Config {
    let parsed = toml::from_str::<Config>(toml_str);
    assert!(parsed.is_ok());
    match parsed {
        Ok(config) => config,
        Err(err) => panic!("config should parse: {err}"),
    }
}

const MINIMAL: &str = r#"
[whatsapp]
phone = "27010203040"
"#;

#[test]
fn parse_minimal_config_with_defaults() {
    let config = parse(MINIMAL);
    assert_eq!(config.whatsapp.cc, "27");
    assert_eq!(config.whatsapp.phone, "27010203040");
    assert_eq!(config.whatsapp.password_env, "VXWHATSAPP_PASSWORD");
    assert_eq!(config.whatsapp.domain, "s.whatsapp.net");
    assert!(config.whatsapp.echo_to.is_none());
    assert_eq!(config.whatsapp.own_address(), "+27010203040");

    assert_eq!(config.sidecar.base_url, "http://127.0.0.1:3001");
    assert_eq!(config.correlation.backend, CorrelationBackendKind::Memory);
    assert_eq!(config.correlation.ttl(), Duration::from_secs(86_400));
    assert_eq!(config.correlation.key_prefix, "whatsapp");

    let settings = config.lifecycle.run_loop_settings();
    assert_eq!(settings.kill_delay, Duration::from_secs(1));
    assert_eq!(settings.poll_interval, Duration::from_millis(100));
    assert_eq!(settings.channel_capacity, 256);

    assert!(config.validate().is_ok());
}

#[test]
fn parse_full_config() {
    let config = parse(
        r#"
[whatsapp]
cc = "44"
phone = "447700900000"
password_env = "WA_SECRET"
echo_to = "+447700900001"

[sidecar]
base_url = "http://sidecar.internal:8080"

[correlation]
backend = "sqlite"
ttl_secs = 3600
sqlite_path = "/var/lib/vxwhatsapp/correlations.db"
key_prefix = "wa-prod"

[lifecycle]
kill_delay_ms = 250
poll_interval_ms = 50
channel_capacity = 32

[logging]
level = "debug"
max_files = 3
"#,
    );
    assert_eq!(config.whatsapp.echo_to.as_deref(), Some("+447700900001"));
    assert_eq!(config.correlation.backend, CorrelationBackendKind::Sqlite);
    assert_eq!(
        config.sqlite_path(Path::new("/ignored")),
        Path::new("/var/lib/vxwhatsapp/correlations.db")
    );
    let settings = config.lifecycle.run_loop_settings();
    assert_eq!(settings.channel_capacity, 32);
    assert_eq!(settings.poll_interval, Duration::from_millis(50));
    assert_eq!(settings.kill_delay, Duration::from_millis(250));
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.max_files, 3);
    assert!(config.validate().is_ok());
}

#[test]
fn relative_sqlite_path_resolves_against_base_dir() {
    let config = parse(MINIMAL);
    assert_eq!(
        config.sqlite_path(Path::new("/home/user/.vxwhatsapp")),
        Path::new("/home/user/.vxwhatsapp/correlations.db")
    );
}

#[test]
fn missing_phone_is_a_parse_error() {
    assert!(toml::from_str::<Config>("[whatsapp]\ncc = \"27\"\n").is_err());
}

#[test]
fn poll_timeout_lives_under_lifecycle() {
    // The sidecar section only carries the URL; the poll timeout is run-loop tuning.
    let config = parse(&format!("{MINIMAL}\n[lifecycle]\npoll_interval_ms = 2500\n"));
    assert_eq!(
        config.lifecycle.run_loop_settings().poll_interval,
        Duration::from_millis(2_500)
    );
}

#[test]
fn unknown_backend_is_a_parse_error() {
    let toml_str = format!("{MINIMAL}\n[correlation]\nbackend = \"redis\"\n");
    assert!(toml::from_str::<Config>(&toml_str).is_err());
}

fn validation_error(extra: &str, phone: &str) -> String {
    let config = parse(&format!("[whatsapp]\nphone = \"{phone}\"\n{extra}"));
    match config.validate() {
        Ok(()) => panic!("config should be rejected"),
        Err(err) => format!("{err:#}"),
    }
}

#[test]
fn validate_rejects_bad_values() {
    assert!(validation_error("", "+27010203040").contains("digits only"));
    assert!(validation_error("", "44123").contains("country code"));
    assert!(validation_error("cc = \"2a\"", "27010203040").contains("whatsapp.cc"));
    assert!(validation_error("domain = \"\"", "27010203040").contains("domain"));
    assert!(validation_error("echo_to = \"+\"", "27010203040").contains("echo_to"));
    assert!(
        validation_error("[sidecar]\nbase_url = \"not a url\"", "27010203040")
            .contains("base_url")
    );
    assert!(
        validation_error("[correlation]\nttl_secs = 0", "27010203040").contains("ttl_secs")
    );
    assert!(
        validation_error("[lifecycle]\nchannel_capacity = 0", "27010203040")
            .contains("channel_capacity")
    );
    assert!(
        validation_error("[logging]\nlevel = \"loud\"", "27010203040").contains("logging.level")
    );
    assert!(
        validation_error("[logging]\nmax_files = 0", "27010203040").contains("max_files")
    );
}

#[test]
fn password_is_read_from_the_named_variable() {
    let config = parse(MINIMAL);
    // "s3cret" in base64
    let password = resolve_password(&config.whatsapp, |key| {
        (key == "VXWHATSAPP_PASSWORD").then(|| "czNjcmV0".to_owned())
    });
    assert_eq!(password.expect("password should resolve"), "s3cret");

    let missing = resolve_password(&config.whatsapp, |_| None);
    match missing {
        Ok(_) => panic!("missing variable should fail"),
        Err(err) => assert!(err.to_string().contains("VXWHATSAPP_PASSWORD")),
    }
}

#[test]
fn password_must_be_base64() {
    assert!(decode_password("not base64!").is_err());
    assert_eq!(decode_password(" czNjcmV0\n").expect("trimmed"), "s3cret");
}

#[test]
fn load_config_reads_a_file() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("config.toml");
    std::fs::write(&path, MINIMAL).expect("should write config");

    let config = load_config(&path).expect("config should load");
    assert_eq!(config.whatsapp.phone, "27010203040");

    let missing = load_config(&tmp.path().join("absent.toml"));
    assert!(missing.is_err());
}

#[test]
fn config_dir_resolves() {
    let dir = config_dir();
    assert!(dir.is_ok());
    let path = match dir {
        Ok(path) => path,
        Err(err) => panic!("config dir should resolve: {err}"),
    };
    assert!(path.ends_with(".vxwhatsapp"));
}

//! Exercises the config DSL parser through the resolved-config layer:
//! a well-formed file loads into the right typed defaults, a
//! mis-indented file reports a line/column, and conflicting listeners
//! are flagged the way `--test-config` would show them.

use reforkd::config::validate::validate_listeners;
use reforkd::config::ResolvedConfig;
use reforkd::net::listener::Address;

#[test]
fn a_well_formed_config_resolves_every_field() {
    let src = "\
worker_processes: 3
timeout: 45
refork_after: [10, 20]
document_root: ./www
listeners:
  - addr: 9090
    backlog: 64
";
    let config = ResolvedConfig::load(src).unwrap();
    assert_eq!(config.worker_processes, 3);
    assert_eq!(config.timeout.as_secs(), 45);
    assert_eq!(config.refork_after, vec![10, 20]);
    assert_eq!(config.listeners.len(), 1);
    assert_eq!(config.listeners[0].address, Address::Tcp("0.0.0.0".to_string(), 9090));
}

#[test]
fn a_mis_indented_nested_key_reports_its_line_and_column() {
    let src = "worker_processes: 4\n    bogus: 1\n";
    let err = ResolvedConfig::load(src).unwrap_err();
    let rendered = err.to_string();
    assert!(rendered.contains("line"), "expected a line/column in: {rendered}");
    assert!(rendered.contains("col"), "expected a line/column in: {rendered}");
}

#[test]
fn duplicate_listeners_loaded_from_config_are_flagged() {
    let src = "\
listeners:
  - addr: 8080
  - addr: 8080
";
    let config = ResolvedConfig::load(src).unwrap();
    let conflicts = validate_listeners(&config);
    assert_eq!(conflicts.len(), 1);
}

#[test]
fn an_unparseable_listener_address_surfaces_as_a_config_error() {
    let src = "listeners:\n  - addr: not:a:valid:address:at:all\n";
    assert!(ResolvedConfig::load(src).is_err());
}

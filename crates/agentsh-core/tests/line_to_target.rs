//! A raw console line taken all the way to a call destination.

use agentsh_core::AgentId;
use agentsh_core::PeerId;
use agentsh_core::Target;
use agentsh_core::address;
use agentsh_core::command::CallKind;
use agentsh_core::command::Command;
use agentsh_core::command::CommandKind;
use agentsh_core::registry::AgentRegistry;
use agentsh_core::tokenize;

fn registry() -> AgentRegistry {
    let mut registry = AgentRegistry::new();
    registry.replace(["a0", "a1", "a2"].into_iter().map(AgentId::new));
    registry
}

fn line_target(line: &str, registry: &AgentRegistry) -> (CommandKind, Target, String, Vec<String>) {
    let command = Command::parse(tokenize::split(line).unwrap()).unwrap();
    let invocation = address::resolve(&command.args).unwrap();
    let target = registry.target(&invocation.address).unwrap();
    (command.kind, target, invocation.method, invocation.args)
}

#[test]
fn test_index_address() {
    let (kind, target, method, args) = line_target(r#"call 2 say "hello world" twice"#, &registry());

    assert_eq!(kind, CommandKind::Call(CallKind::Synchronous));
    assert_eq!(target, Target::agent(AgentId::new("a2")));
    assert_eq!(method, "say");
    assert_eq!(args, vec!["hello world", "twice"]);
}

#[test]
fn test_agent_and_peer_addresses() {
    let registry = AgentRegistry::new();

    let (kind, target, method, _) = line_target("ca AID:far getName", &registry);
    assert_eq!(kind, CommandKind::Call(CallKind::Asynchronous));
    assert_eq!(target, Target::agent(AgentId::new("far")));
    assert_eq!(method, "getName");

    let (kind, target, method, args) = line_target("co pid:p9 aid:far move 1 2", &registry);
    assert_eq!(kind, CommandKind::Call(CallKind::OneWay));
    assert_eq!(target, Target::pinned(PeerId::new("p9"), AgentId::new("far")));
    assert_eq!(method, "move");
    assert_eq!(args, vec!["1", "2"]);
}

#[test]
fn test_stale_index_fails_at_the_registry() {
    let command = Command::parse(tokenize::split("call 3 getName").unwrap()).unwrap();
    let invocation = address::resolve(&command.args).unwrap();
    assert!(registry().target(&invocation.address).is_err());
}

#[test]
fn test_lone_peer_prefix_is_not_an_address() {
    let command = Command::parse(tokenize::split("call pid:p9 getName").unwrap()).unwrap();
    assert_eq!(
        address::resolve(&command.args),
        Err(address::Error::Unrecognized("pid:p9".into())),
    );
}

//! The console loop driving a live mesh, asserting on operator output.

use std::sync::Arc;
use std::time::Duration;

use agentsh_core::console::Captured;
use agentsh_core::console::Console;
use agentsh_core::platform::Location;
use agentsh_core::shell::Flow;
use agentsh_core::shell::Shell;
use agentsh_core::shell::ShellConfig;

use agentsh_mesh::Mesh;
use agentsh_mesh::MeshPlatform;
use agentsh_mesh::node::Node;

struct Rig {
    shell: Shell,
    out: Captured,
    platform: Arc<MeshPlatform>,
    remote: Arc<Node>,
}

fn rig(config: ShellConfig) -> Rig {
    let mesh = Mesh::new();
    let platform = Arc::new(MeshPlatform::new(mesh.clone(), "home", Some(Location::new(135.0, 34.0)), "127.0.0.1:12367"));
    let remote = mesh.add_node("remote", Some(Location::new(139.7, 35.6)));
    remote.set_online(true);

    let (console, out) = Console::capture();
    let shell = Shell::new(platform.clone(), console, config);
    Rig { shell, out, platform, remote }
}

fn untimed(out: &Captured) -> Vec<String> {
    out.take()
        .lines()
        .filter(|l| !l.starts_with("\t## time (msec): "))
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn test_operator_session() {
    let mut rig = rig(ShellConfig::default());

    rig.shell.execute("mkagent echo alice").await;
    rig.shell.execute("mk counter bob tally").await;
    rig.shell.execute("agents").await;
    let listing = untimed(&rig.out);
    assert_eq!(listing.len(), 2);
    assert!(listing[0].starts_with(" 0. name: alice, ID: "));
    assert!(listing[1].starts_with(" 1. name: bob, ID: "));

    rig.shell.execute(r#"call 0 echo "hello world" again"#).await;
    rig.shell.execute("c 1 inc 3").await;
    rig.shell.execute("c 1 fly").await;
    assert_eq!(
        untimed(&rig.out),
        vec![
            " return value: hello world again",
            " return value: 3",
            "\t>> cannot call agent: remote invocation failed: no such method: fly.",
        ],
    );

    rig.shell.execute("sleep 0").await;
    rig.shell.execute("ag").await;
    assert!(untimed(&rig.out)[0].ends_with(" <sleep>"));
    rig.shell.execute("c 0 getName").await;
    assert_eq!(
        untimed(&rig.out),
        vec![format!(
            "\t>> cannot call agent: remote invocation failed: agent {} is sleeping.",
            rig.shell.registry().resolve_local(0).unwrap(),
        )],
    );

    rig.shell.execute("wake 0").await;
    rig.shell.execute("dup 1").await;
    rig.shell.execute("fin 0").await;
    rig.shell.execute("agents").await;
    let after = untimed(&rig.out);
    assert_eq!(after.len(), 2);
    assert!(after[0].starts_with(" 0. name: bob, ID: "));
    assert!(after[1].starts_with(" 1. name: bob, ID: "));

    rig.shell.execute("c 1 get").await;
    assert_eq!(untimed(&rig.out), vec![" return value: 3"]);
}

#[tokio::test]
async fn test_remote_agents_by_id_need_join() {
    let mut rig = rig(ShellConfig::default());
    let far = rig.remote.create_agent("echo", "far", None, None).unwrap();

    rig.shell.execute(&format!("call aid:{far} getName")).await;
    assert_eq!(
        untimed(&rig.out),
        vec!["\t>> cannot call agent: dispatch failed: not joined to the network."],
    );

    rig.shell.execute("join").await;
    rig.shell.execute(&format!("call AID:{far} getName")).await;
    rig.shell.execute(&format!("c pid:{} aid:{far} getClass", rig.remote.id())).await;
    assert_eq!(untimed(&rig.out), vec![" return value: far", " return value: echo"]);

    rig.shell.execute("c aid:nobody getName").await;
    assert_eq!(
        untimed(&rig.out),
        vec!["\t>> cannot call agent: address not found: agent nobody."],
    );
}

#[tokio::test]
async fn test_discovery_session() {
    let mut rig = rig(ShellConfig::default());
    rig.shell.execute("mkagent echo osaka sensors").await;
    let tokyo = rig.remote.create_agent("echo", "tokyo", Some("sensors"), None).unwrap();
    rig.remote.create_agent("counter", "tally", Some("sensors"), None).unwrap();

    rig.shell.execute(r#"discover true getName"#).await;
    assert_eq!(untimed(&rig.out), vec!["\t>> not joined."]);

    rig.shell.execute("join").await;
    rig.shell.execute("dcl 139 35 1 1 getName").await;
    assert_eq!(
        untimed(&rig.out),
        vec![
            " value: tokyo".to_string(),
            format!(" peerId: {}", rig.remote.id()),
            format!(" agentId: {tokyo}"),
        ],
    );

    rig.shell.execute(r#"dc "category == sensors" echo hi"#).await;
    let out = untimed(&rig.out);
    assert_eq!(out.iter().filter(|l| *l == " value: hi").count(), 2);
    assert_eq!(
        out.iter().filter(|l| l.starts_with("\t>> cannot call agent: remote invocation failed: no such method")).count(),
        1,
    );
    assert!(!out.contains(&" Timeout.".to_string()));

    rig.shell.execute(r#"dc "name ==" getName"#).await;
    assert_eq!(untimed(&rig.out), vec!["\t>> invalid query: query ends too early."]);
}

#[tokio::test]
async fn test_deeply_nested_query_is_rejected() {
    let mut rig = rig(ShellConfig::default());
    rig.shell.execute("join").await;

    let nots = format!(r#"dc "{}true" getName"#, "not ".repeat(200_000));
    assert_eq!(rig.shell.execute(&nots).await, Flow::Continue);
    let parens = format!(r#"dc "{}true{}" getName"#, "(".repeat(50_000), ")".repeat(50_000));
    assert_eq!(rig.shell.execute(&parens).await, Flow::Continue);

    let out = untimed(&rig.out);
    assert_eq!(out.len(), 2);
    assert!(out.iter().all(|l| l.starts_with("\t>> invalid query: query nests deeper than 128")));

    rig.shell.execute("i").await;
    assert_eq!(untimed(&rig.out)[0], " peerName: home");
}

#[tokio::test]
async fn test_slow_discovery_times_out_without_failing() {
    let config = ShellConfig {
        discovery_timeout: Duration::from_millis(100),
        ..ShellConfig::default()
    };
    let mut rig = rig(config);
    rig.remote.create_agent("echo", "slow", None, None).unwrap();
    rig.remote.create_agent("counter", "fast", None, None).unwrap();

    rig.shell.execute("join").await;
    assert_eq!(rig.shell.execute("dc true delay 1000").await, Flow::Continue);

    let out = untimed(&rig.out);
    assert!(out[0].starts_with("\t>> cannot call agent: remote invocation failed: no such method"));
    assert_eq!(out.last().map(String::as_str), Some(" Timeout."));
    assert!(!out.contains(&" value: done".to_string()));

    rig.shell.execute("i").await;
    assert_eq!(untimed(&rig.out)[0], " peerName: home");
}

#[tokio::test]
async fn test_async_results_arrive_after_later_commands() {
    let mut rig = rig(ShellConfig::default());
    rig.shell.execute("mkagent echo alice").await;
    rig.shell.execute("agents").await;
    rig.shell.execute("join").await;
    rig.out.take();

    rig.shell.execute("ca 0 delay 300 late").await;
    rig.shell.execute("c 0 echo now").await;
    assert_eq!(untimed(&rig.out), vec![" return value: now"]);

    rig.shell.execute("dca true getName").await;
    rig.shell.pump().wait_idle().await;
    let late = untimed(&rig.out);
    assert!(late.contains(&" return value: late".to_string()));
    assert!(late.contains(&" value: alice".to_string()));
}

#[tokio::test]
async fn test_bye_leaves_the_network() {
    let mut rig = rig(ShellConfig::default());
    rig.shell.execute("join").await;
    assert!(agentsh_core::Platform::is_online(rig.platform.as_ref()));

    assert_eq!(rig.shell.execute("bye").await, Flow::Exit);
    assert!(!agentsh_core::Platform::is_online(rig.platform.as_ref()));
}

#[tokio::test]
async fn test_scripted_input_until_end() {
    let mut rig = rig(ShellConfig::default());
    let script = b"mkagent counter c1\nagents\ncall 0 inc 2\njoin\n";

    rig.shell.run(&script[..]).await.unwrap();

    let out = rig.out.contents();
    assert!(out.contains(" return value: 2\n"));
    assert!(out.starts_with("Input Command >"));
    assert!(!agentsh_core::Platform::is_online(rig.platform.as_ref()));
}

use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use base64::Engine;
use dbgp_codec::{encode_frame, parse_command_line, Command, ParsedCommand};
use tracing_subscriber::EnvFilter;

use transport::{
    bindings::get_random_tcp_port,
    responses::{self, Status, REDACTED_VALUE},
    ListenOutcome, ProtocolSession,
};

#[ctor::ctor]
fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
    let _ = color_eyre::install();
}

/// Scripted engine peer: connects back, sends the init packet, then answers
/// every command from a canned table.
struct FakeEngine {
    stream: TcpStream,
}

impl FakeEngine {
    fn connect(port: u16) -> Self {
        for _ in 0..50 {
            if let Ok(stream) = TcpStream::connect(format!("127.0.0.1:{port}")) {
                return Self { stream };
            }
            thread::sleep(Duration::from_millis(50));
        }
        panic!("could not connect to debugger on port {port}");
    }

    fn send_body(&mut self, body: &str) {
        self.stream
            .write_all(&encode_frame(body.as_bytes()))
            .expect("writing frame");
    }

    fn next_command(&mut self) -> ParsedCommand {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            let n = self.stream.read(&mut byte).expect("reading byte");
            if n == 0 {
                panic!("client hung up mid command");
            }
            if byte[0] == 0 {
                break;
            }
            line.push(byte[0]);
        }
        let line = String::from_utf8(line).expect("command is utf8");
        parse_command_line(&line).unwrap_or_else(|| panic!("unparseable command: {line}"))
    }
}

fn b64(data: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

#[test]
fn full_debug_conversation() -> eyre::Result<()> {
    let port = get_random_tcp_port()?;

    let engine = thread::spawn(move || {
        let mut engine = FakeEngine::connect(port);
        engine.send_body(r#"<init fileuri="file:///srv/index.php" language="PHP"/>"#);

        // breakpoint_set
        let cmd = engine.next_command();
        assert_eq!(cmd.verb, "breakpoint_set");
        assert_eq!(cmd.option("t"), Some("line"));
        assert_eq!(cmd.option("f"), Some("file:///srv/index.php"));
        assert_eq!(cmd.option("n"), Some("12"));
        engine.send_body(&format!(
            r#"<response command="breakpoint_set" transaction_id="{}" id="bp-900001"/>"#,
            cmd.transaction_id
        ));

        // run -> break at the breakpoint
        let cmd = engine.next_command();
        assert_eq!(cmd.verb, "run");
        engine.send_body(&format!(
            r#"<response xmlns:xdebug="urn:xdebug" command="run" transaction_id="{}" status="break" reason="ok">
                 <xdebug:message filename="file:///srv/index.php" lineno="12"/>
               </response>"#,
            cmd.transaction_id
        ));

        // context_get
        let cmd = engine.next_command();
        assert_eq!(cmd.verb, "context_get");
        engine.send_body(&format!(
            r#"<response command="context_get" transaction_id="{tid}">
                 <property fullname="$count" type="int">{count}</property>
                 <property fullname="$password" type="string">{password}</property>
               </response>"#,
            tid = cmd.transaction_id,
            count = b64("3"),
            password = b64("secret"),
        ));

        // stack_get
        let cmd = engine.next_command();
        assert_eq!(cmd.verb, "stack_get");
        engine.send_body(&format!(
            r#"<response command="stack_get" transaction_id="{}">
                 <stack where="{{main}}" level="0" type="file" filename="file:///srv/index.php" lineno="12"/>
               </response>"#,
            cmd.transaction_id
        ));

        // stop
        let cmd = engine.next_command();
        assert_eq!(cmd.verb, "stop");
        engine.send_body(&format!(
            r#"<response command="stop" transaction_id="{}" status="stopped" reason="ok"/>"#,
            cmd.transaction_id
        ));
    });

    let mut session = ProtocolSession::new();
    assert_eq!(session.listen(port)?, ListenOutcome::Connected);

    let init = responses::decode_init(&session.receive()?)?;
    assert_eq!(init.file_uri, "file:///srv/index.php");

    let reply = session.request(
        &Command::new("breakpoint_set")
            .option("t", "line")
            .option("f", &init.file_uri)
            .option("n", 12),
    )?;
    assert_eq!(reply.attribute("id"), Some("bp-900001"));

    let status = responses::decode_status(&session.request(&Command::new("run"))?)?;
    assert_eq!(status.status, Status::Break);
    let location = status.break_location.expect("break carries a location");
    assert_eq!(location.file, "file:///srv/index.php");
    assert_eq!(location.line, 12);

    let properties =
        responses::decode_property_tree(&session.request(&Command::new("context_get"))?);
    assert_eq!(properties.len(), 2);
    assert_eq!(properties[0].value.as_deref(), Some("3"));
    assert_eq!(properties[1].value.as_deref(), Some(REDACTED_VALUE));

    let stack = responses::decode_stack(&session.request(&Command::new("stack_get"))?);
    assert_eq!(stack.len(), 1);
    assert_eq!(stack[0].line, 12);

    let status = responses::decode_status(&session.request(&Command::new("stop"))?)?;
    assert!(status.status.is_terminal());

    session.close();
    engine.join().unwrap();
    Ok(())
}

#[test]
fn transaction_ids_increase_across_commands() -> eyre::Result<()> {
    let port = get_random_tcp_port()?;

    let engine = thread::spawn(move || {
        let mut engine = FakeEngine::connect(port);
        engine.send_body(r#"<init fileuri="file:///srv/a.php"/>"#);

        let mut seen = Vec::new();
        for _ in 0..3 {
            let cmd = engine.next_command();
            seen.push(cmd.transaction_id);
            engine.send_body(&format!(
                r#"<response command="status" transaction_id="{}" status="running" reason="ok"/>"#,
                cmd.transaction_id
            ));
        }
        seen
    });

    let mut session = ProtocolSession::new();
    session.listen(port)?;
    session.receive()?;

    for _ in 0..3 {
        session.request(&Command::new("status"))?;
    }
    session.close();

    let seen = engine.join().unwrap();
    assert_eq!(seen, vec![1, 2, 3]);
    Ok(())
}

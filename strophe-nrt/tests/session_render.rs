//! End-to-end scheduling: sessions in, bundles and datagrams out.

mod common;

use std::path::Path;

use rosc::{OscPacket, OscType};
use strophe_nrt::*;
use strophe_types::CalculationRate;

fn offsets(bundles: &[Bundle]) -> Vec<f64> {
    bundles.iter().map(|bundle| bundle.offset.seconds()).collect()
}

fn addresses(bundle: &Bundle) -> Vec<&'static str> {
    bundle.commands.iter().map(Command::address).collect()
}

fn synth_new(node: i32, controls: Vec<(&str, f32)>) -> Command {
    Command::SynthNew {
        synthdef: "sine".into(),
        node,
        action: AddAction::AddToHead,
        target: 0,
        controls: controls
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect(),
    }
}

#[test]
fn test_single_synth_produces_two_bundles() {
    let mut session = Session::default();
    session.add_synth(0.0, 10.0, common::sine("sine")).unwrap();

    let bundles = session.to_bundles(None).unwrap();
    assert_eq!(offsets(&bundles), vec![0.0, 10.0]);
    assert_eq!(addresses(&bundles[0]), vec!["/d_recv", "/s_new"]);
    assert_eq!(bundles[0].commands[1], synth_new(1000, vec![]));
    assert_eq!(bundles[1].commands, vec![Command::NodeFree(vec![1000])]);
}

#[test]
fn test_shared_definition_is_received_once() {
    let mut session = Session::default();
    let synthdef = common::sine("sine");
    session.add_synth(0.0, 10.0, synthdef.clone()).unwrap();
    session.add_synth(5.0, 15.0, synthdef).unwrap();

    let bundles = session.to_bundles(None).unwrap();
    let receives: Vec<f64> = bundles
        .iter()
        .filter(|bundle| {
            bundle
                .commands
                .iter()
                .any(|command| matches!(command, Command::SynthDefReceive { .. }))
        })
        .map(|bundle| bundle.offset.seconds())
        .collect();
    assert_eq!(receives, vec![0.0]);
    assert_eq!(
        bundles[0]
            .commands
            .iter()
            .filter(|command| matches!(command, Command::SynthDefReceive { .. }))
            .count(),
        1
    );
}

#[test]
fn test_overlapping_synths_with_changes() {
    let mut session = Session::default();
    let synthdef = common::sine("sine");
    let a = session.add_synth(0.0, 10.0, synthdef.clone()).unwrap();
    let b = session.add_synth(5.0, 15.0, synthdef.clone()).unwrap();
    session.set(b, "frequency", 443.0).unwrap();
    let c = session.add_synth(0.0, 15.0, synthdef).unwrap();
    session.set(c, "frequency", 666.0).unwrap();
    session
        .at(7.5)
        .unwrap()
        .set(a, "frequency", 880.0)
        .unwrap()
        .set(b, "frequency", 990.0)
        .unwrap();

    let bundles = session.to_bundles(None).unwrap();
    assert_eq!(offsets(&bundles), vec![0.0, 5.0, 7.5, 10.0, 15.0]);

    assert_eq!(addresses(&bundles[0]), vec!["/d_recv", "/s_new", "/s_new"]);
    assert_eq!(bundles[0].commands[1], synth_new(1000, vec![]));
    assert_eq!(bundles[0].commands[2], synth_new(1001, vec![("frequency", 666.0)]));
    assert_eq!(bundles[1].commands, vec![synth_new(1002, vec![("frequency", 443.0)])]);
    assert_eq!(
        bundles[2].commands,
        vec![
            Command::NodeSet {
                node: 1000,
                controls: vec![("frequency".into(), 880.0)],
            },
            Command::NodeSet {
                node: 1002,
                controls: vec![("frequency".into(), 990.0)],
            },
        ]
    );
    assert_eq!(bundles[3].commands, vec![Command::NodeFree(vec![1000])]);
    assert_eq!(bundles[4].commands, vec![Command::NodeFree(vec![1001, 1002])]);
}

#[test]
fn test_commands_follow_priority_within_a_bundle() {
    let mut session = Session::default();
    let bus = session.add_bus(CalculationRate::Control).unwrap();
    let synth = session.add_synth(0.0, 4.0, common::sine("sine")).unwrap();
    let group = session.add_group(0.0, 4.0).unwrap();
    session.place(synth, AddAction::AddToHead, group).unwrap();
    session.set(synth, "frequency", bus).unwrap();
    session.at(0.0).unwrap().set_bus(bus, 330.0).unwrap();

    let bundles = session.to_bundles(None).unwrap();
    assert_eq!(
        addresses(&bundles[0]),
        vec!["/d_recv", "/c_set", "/g_new", "/s_new", "/n_mapn"]
    );
    let priorities: Vec<u8> = bundles[0].commands.iter().map(Command::priority).collect();
    assert!(priorities.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[test]
fn test_groups_are_created_before_the_synths_beside_them() {
    let mut session = Session::default();
    let synth = session.add_synth(0.0, 10.0, common::sine("sine")).unwrap();
    let group = session.add_group(0.0, 5.0).unwrap();
    assert!(matches!(
        session.place(group, AddAction::AddAfter, synth),
        Err(SchedulingError::InvalidTarget { .. })
    ));

    let outer = session.add_group(0.0, 10.0).unwrap();
    session.place(synth, AddAction::AddToHead, outer).unwrap();
    session.place(group, AddAction::AddAfter, outer).unwrap();

    let bundles = session.to_bundles(None).unwrap();
    assert_eq!(
        addresses(&bundles[0]),
        vec!["/d_recv", "/g_new", "/g_new", "/s_new"]
    );
}

#[test]
fn test_bus_values_are_coalesced_and_sorted() {
    let mut session = Session::default();
    let group = session.add_bus_group(3, CalculationRate::Control).unwrap();
    let single = session.add_bus(CalculationRate::Control).unwrap();
    session.add_group(0.0, 2.0).unwrap();
    session
        .at(1.0)
        .unwrap()
        .set_bus(single, 9.0)
        .unwrap()
        .set_bus_group(group, &[1.0, 2.0, 3.0])
        .unwrap();

    let bundles = session.to_bundles(None).unwrap();
    assert_eq!(offsets(&bundles), vec![0.0, 1.0, 2.0]);
    assert_eq!(
        bundles[1].commands,
        vec![Command::ControlBusSet(vec![(0, 1.0), (1, 2.0), (2, 3.0), (3, 9.0)])]
    );
}

#[test]
fn test_window_is_masked_and_closed_with_an_empty_bundle() {
    let mut session = Session::default();
    session.add_synth(0.0, 10.0, common::sine("sine")).unwrap();
    session.add_synth(12.0, 14.0, common::sine("sine")).unwrap();

    let range = OffsetRange::new(2.0, 11.0).unwrap();
    let bundles = session.to_bundles(Some(range)).unwrap();
    assert_eq!(offsets(&bundles), vec![0.0, 8.0, 9.0]);
    assert_eq!(addresses(&bundles[0]), vec!["/d_recv", "/s_new"]);
    assert_eq!(bundles[1].commands, vec![Command::NodeFree(vec![1000])]);
    assert!(bundles[2].commands.is_empty());
}

#[test]
fn test_windowed_rendering_leaves_the_session_untouched() {
    let mut session = Session::default();
    let bus = session.add_bus(CalculationRate::Control).unwrap();
    let synth = session.add_synth(0.0, 10.0, common::sine("sine")).unwrap();
    session.at(1.0).unwrap().set(synth, "frequency", 550.0).unwrap();
    session.at(3.0).unwrap().set_bus(bus, 0.5).unwrap();

    let range = OffsetRange::new(2.0, 6.0).unwrap();
    let first = session.to_bundles(Some(range)).unwrap();
    let second = session.to_bundles(Some(range)).unwrap();
    assert_eq!(first, second);
    assert_eq!(offsets(&first), vec![0.0, 1.0, 4.0]);
    assert_eq!(session.to_bundles(None).unwrap().len(), 4);
}

#[test]
fn test_window_ending_inside_a_synth_frees_it_at_the_boundary() {
    let mut session = Session::default();
    session.add_synth(0.0, 10.0, common::sine("sine")).unwrap();

    let bundles = session
        .to_bundles(Some(OffsetRange::new(0.0, 5.0).unwrap()))
        .unwrap();
    assert_eq!(offsets(&bundles), vec![0.0, 5.0]);
    assert_eq!(bundles[1].commands, vec![Command::NodeFree(vec![1000])]);
}

#[test]
fn test_empty_session_is_an_error() {
    let session = Session::default();
    assert!(matches!(session.to_bundles(None), Err(RenderError::EmptySession)));
    assert!(matches!(session.to_datagram(None), Err(RenderError::EmptySession)));

    let mut session = Session::default();
    session.add_synth(0.0, 1.0, common::sine("sine")).unwrap();
    let late = OffsetRange::new(5.0, 6.0).unwrap();
    assert!(matches!(session.to_bundles(Some(late)), Err(RenderError::EmptySession)));
}

#[test]
fn test_datagram_decodes_back_to_bundles() {
    let mut session = Session::default();
    session.add_synth(0.0, 2.5, common::sine("sine")).unwrap();
    let datagram = session.to_datagram(None).unwrap();

    let mut rest = datagram.as_slice();
    let mut decoded = Vec::new();
    while !rest.is_empty() {
        let (length, tail) = rest.split_at(4);
        let length = i32::from_be_bytes(length.try_into().unwrap()) as usize;
        let (record, tail) = tail.split_at(length);
        let (_, packet) = rosc::decoder::decode_udp(record).unwrap();
        decoded.push(packet);
        rest = tail;
    }
    assert_eq!(decoded.len(), 2);

    let OscPacket::Bundle(first) = &decoded[0] else {
        panic!("expected a bundle");
    };
    assert_eq!((first.timetag.seconds, first.timetag.fractional), (0, 0));
    let OscPacket::Message(receive) = &first.content[0] else {
        panic!("expected a message");
    };
    assert_eq!(receive.addr, "/d_recv");
    let bytes = common::sine("sine").to_bytes().unwrap();
    assert_eq!(receive.args, vec![OscType::Blob(bytes)]);

    let OscPacket::Bundle(last) = &decoded[1] else {
        panic!("expected a bundle");
    };
    assert_eq!((last.timetag.seconds, last.timetag.fractional), (2, 1 << 31));
}

#[test]
fn test_identical_sessions_give_identical_datagrams() {
    let build = || {
        let mut session = Session::new(2, 2);
        let synth = session.add_synth(0.0, 3.0, common::sine("sine")).unwrap();
        session.at(1.0).unwrap().set(synth, "frequency", 220.0).unwrap();
        session.to_datagram(None).unwrap()
    };
    assert_eq!(build(), build());
}

#[test]
fn test_build_command_arguments() {
    let session = Session::new(2, 8);
    let config = RenderConfig::default();
    let args = build_command(
        &config,
        &session,
        Path::new("/tmp/score.osc"),
        None,
        Path::new("/tmp/out.aiff"),
    );
    assert_eq!(
        args,
        vec![
            "scsynth", "-i", "2", "-o", "8", "-z", "64", "-m", "8192", "-b", "1024", "-n",
            "1024", "-w", "64", "-N", "/tmp/score.osc", "_", "/tmp/out.aiff", "44100", "aiff",
            "int24",
        ]
    );

    let config = config
        .with_sample_rate(48_000)
        .with_header_format(HeaderFormat::Wav)
        .with_sample_format(SampleFormat::Float);
    let args = build_command(
        &config,
        &session,
        Path::new("score.osc"),
        Some(Path::new("in.wav")),
        Path::new("out.wav"),
    );
    assert_eq!(&args[17..], ["in.wav", "out.wav", "48000", "wav", "float"]);
}

#[cfg(unix)]
#[test]
fn test_render_reports_exit_status() {
    let mut session = Session::default();
    session.add_synth(0.0, 1.0, common::sine("sine")).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.aiff");

    let config = RenderConfig::default().with_executable("true");
    let outcome = render(&session, None, None, &output, &config).unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.exit_code, Some(0));
    assert_eq!(outcome.output, output);

    let config = RenderConfig::default().with_executable("false");
    let outcome = render(&session, None, None, &output, &config).unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.exit_code, Some(1));
}

#[test]
fn test_render_fails_when_the_server_cannot_start() {
    let mut session = Session::default();
    session.add_synth(0.0, 1.0, common::sine("sine")).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let config = RenderConfig::default().with_executable(dir.path().join("no-such-scsynth").display().to_string());
    assert!(matches!(
        render(&session, None, None, &dir.path().join("out.aiff"), &config),
        Err(RenderError::Io(_))
    ));
}

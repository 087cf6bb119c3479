//! End-to-end coordinator tests over fake transports: fan-out, merge,
//! post-filters, and all-or-nothing cleanup.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use strata_rs::coordinator::{split_for_term, Coordinator, RemoteCall, RemoteSession, SessionField};
use strata_rs::stats::materialize;
use strata_rs::test_support::{drain, rec, FakeTransport};
use strata_rs::{EngineConfig, FtgsParams, FtgsRecord, NodeAddr, QueryError};

fn nodes(count: u16) -> Vec<NodeAddr> {
    (0..count)
        .map(|idx| NodeAddr::new(format!("worker-{idx}"), 9000 + idx))
        .collect()
}

fn single_session(node_list: Vec<NodeAddr>) -> Arc<RemoteSession> {
    Arc::new(RemoteSession::new("session-1", node_list))
}

fn dataset() -> Vec<FtgsRecord> {
    vec![
        rec("country", "de", &[4.0]),
        rec("country", "jp", &[2.0]),
        rec("country", "us", &[11.0]),
        rec("status", 200, &[90.0]),
        rec("status", 404, &[7.0]),
        rec("status", 500, &[3.0]),
    ]
}

#[test]
fn session_ftgs_merges_disjoint_splits_in_order() {
    let transport = Arc::new(FakeTransport::sharded(1, dataset()));
    let coordinator = Coordinator::new(transport);
    let session = single_session(nodes(3));

    let mut merged = coordinator
        .session_ftgs(&session, "country", false, FtgsParams::unlimited(true))
        .unwrap();
    let records = drain(merged.as_mut()).unwrap();

    let mut expected = dataset();
    expected.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    assert_eq!(records, expected);
}

#[test]
fn disjoint_split_records_arrive_verbatim() {
    let data = dataset();
    let transport = Arc::new(FakeTransport::sharded(1, data.clone()));
    let coordinator = Coordinator::new(transport);
    let session = single_session(nodes(3));

    let mut merged = coordinator
        .session_ftgs(&session, "country", false, FtgsParams::unlimited(true))
        .unwrap();
    let records = drain(merged.as_mut()).unwrap();

    // Every record must match its source exactly (no summing), and its term
    // must indeed route to some split of the 3-way fan-out.
    for record in &records {
        let original = data
            .iter()
            .find(|candidate| candidate.sort_key() == record.sort_key())
            .expect("record invented by merge");
        assert_eq!(record.stats, original.stats);
        assert!(split_for_term(false, &record.term, 3) < 3);
    }
    assert_eq!(records.len(), data.len());
}

#[test]
fn multi_ftgs_sums_terms_shared_across_sessions() {
    let node_a = NodeAddr::new("a", 1);
    let node_b = NodeAddr::new("b", 1);
    let streams = vec![
        (
            node_a.clone(),
            vec![rec("f", "a", &[2.0]), rec("f", "c", &[5.0])],
        ),
        (
            node_b.clone(),
            vec![rec("f", "b", &[1.0]), rec("f", "c", &[3.0])],
        ),
    ];

    let transport = Arc::new(FakeTransport::per_node(1, streams));
    let coordinator = Coordinator::new(transport);
    let session_a = Arc::new(RemoteSession::new("s-a", vec![node_a]));
    let session_b = Arc::new(RemoteSession::new("s-b", vec![node_b]));
    let participants = vec![
        SessionField::new(session_a, "f"),
        SessionField::new(session_b, "f"),
    ];

    let mut merged = coordinator
        .multi_ftgs(
            &participants,
            vec!["count()".to_string()],
            Vec::new(),
            false,
            FtgsParams::unlimited(true),
        )
        .unwrap();
    let records = drain(merged.as_mut()).unwrap();

    assert_eq!(
        records,
        vec![
            rec("f", "a", &[2.0]),
            rec("f", "b", &[1.0]),
            rec("f", "c", &[8.0]),
        ]
    );
}

#[test]
fn top_terms_over_fan_out_is_input_order_insensitive() {
    let transport = Arc::new(FakeTransport::sharded(
        1,
        vec![
            rec("f", "a", &[10.0]),
            rec("f", "b", &[30.0]),
            rec("f", "c", &[20.0]),
            rec("f", "d", &[5.0]),
        ],
    ));
    let coordinator = Coordinator::new(transport);
    let session = single_session(nodes(3));
    let participants = vec![SessionField::new(session, "f")];

    let params = FtgsParams::new(2, 0, true).unwrap();
    let mut merged = coordinator
        .multi_ftgs(&participants, Vec::new(), Vec::new(), false, params)
        .unwrap();
    let records = drain(merged.as_mut()).unwrap();

    assert_eq!(
        records,
        vec![rec("f", "b", &[30.0]), rec("f", "c", &[20.0])]
    );
}

#[test]
fn failed_node_aborts_and_closes_already_opened_streams() {
    let node_list = nodes(3);
    let mut transport = FakeTransport::sharded(1, dataset());
    transport.fail_node(node_list[1].clone());
    let transport = Arc::new(transport);
    let coordinator = Coordinator::new(Arc::clone(&transport) as Arc<dyn RemoteCall>);
    let session = single_session(node_list.clone());
    let participants = vec![SessionField::new(session, "country")];

    let err = coordinator
        .multi_ftgs(
            &participants,
            Vec::new(),
            Vec::new(),
            false,
            FtgsParams::unlimited(true),
        )
        .unwrap_err();

    match err {
        QueryError::RemoteCall { node, .. } => assert_eq!(node, node_list[1]),
        other => panic!("expected RemoteCall failure, got {other}"),
    }
    let flags = transport.open_flags();
    assert_eq!(flags.len(), 2);
    assert!(flags.iter().all(|flag| flag.load(Ordering::SeqCst)));
}

#[test]
fn bounded_pool_stops_issuing_after_first_failure() {
    let node_list = nodes(3);
    let mut transport = FakeTransport::sharded(1, dataset());
    transport.fail_node(node_list[0].clone());
    let transport = Arc::new(transport);

    let mut config = EngineConfig::default();
    config.fanout.max_parallel_requests = 1;
    let coordinator = Coordinator::with_config(Arc::clone(&transport) as Arc<dyn RemoteCall>, config);
    let session = single_session(node_list);
    let participants = vec![SessionField::new(session, "country")];

    let err = coordinator
        .multi_ftgs(
            &participants,
            Vec::new(),
            Vec::new(),
            false,
            FtgsParams::unlimited(true),
        )
        .unwrap_err();
    assert!(matches!(err, QueryError::RemoteCall { .. }));

    // First wave failed; the later waves were never issued.
    assert!(transport.open_flags().is_empty());
}

#[test]
fn abandoning_the_merged_stream_closes_every_split() {
    let transport = Arc::new(FakeTransport::sharded(1, dataset()));
    let coordinator = Coordinator::new(Arc::clone(&transport) as Arc<dyn RemoteCall>);
    let session = single_session(nodes(3));
    let participants = vec![SessionField::new(session, "country")];

    let mut merged = coordinator
        .multi_ftgs(
            &participants,
            Vec::new(),
            Vec::new(),
            false,
            FtgsParams::unlimited(true),
        )
        .unwrap();
    assert!(merged.next_term().unwrap());
    drop(merged);

    let flags = transport.open_flags();
    assert_eq!(flags.len(), 3);
    assert!(flags.iter().all(|flag| flag.load(Ordering::SeqCst)));
}

#[test]
fn aggregate_distinct_combines_per_node_streams() {
    let node_list = nodes(2);
    let mut transport = FakeTransport::sharded(1, Vec::new());
    transport.set_distinct(node_list[0].clone(), vec![0, 3, 5]);
    transport.set_distinct(node_list[1].clone(), vec![0, 2, 0]);
    let coordinator = Coordinator::new(Arc::new(transport));
    let session = single_session(node_list);
    let participants = vec![SessionField::new(session, "user_id")];

    let combined = coordinator
        .aggregate_distinct(&participants, Vec::new(), true)
        .unwrap();
    assert_eq!(materialize(combined).unwrap(), vec![0, 5, 5]);
}

#[test]
fn aggregate_distinct_rejects_group_count_mismatch() {
    let node_list = nodes(2);
    let mut transport = FakeTransport::sharded(1, Vec::new());
    transport.set_distinct(node_list[0].clone(), vec![0, 3, 5]);
    transport.set_distinct(node_list[1].clone(), vec![0, 2]);
    let transport = Arc::new(transport);
    let coordinator = Coordinator::new(Arc::clone(&transport) as Arc<dyn RemoteCall>);
    let session = single_session(node_list);
    let participants = vec![SessionField::new(session, "user_id")];

    let err = coordinator
        .aggregate_distinct(&participants, Vec::new(), true)
        .unwrap_err();
    assert!(matches!(
        err,
        QueryError::GroupCountMismatch {
            expected: 3,
            actual: 2
        }
    ));
    // The mismatch check closed both streams before combining anything.
    let flags = transport.open_flags();
    assert_eq!(flags.len(), 2);
    assert!(flags.iter().all(|flag| flag.load(Ordering::SeqCst)));
}

#[test]
fn unsorted_multi_ftgs_concatenates_streams() {
    let node_a = NodeAddr::new("a", 1);
    let node_b = NodeAddr::new("b", 1);
    let streams = vec![
        (node_a.clone(), vec![rec("f", "z", &[1.0])]),
        (
            node_b.clone(),
            vec![rec("f", "a", &[2.0]), rec("f", "z", &[3.0])],
        ),
    ];

    let transport = Arc::new(FakeTransport::per_node(1, streams));
    let coordinator = Coordinator::new(transport);
    let session = Arc::new(RemoteSession::new("s", vec![node_a, node_b]));
    let participants = vec![SessionField::new(session, "f")];

    let mut merged = coordinator
        .multi_ftgs(
            &participants,
            Vec::new(),
            Vec::new(),
            false,
            FtgsParams::unlimited(false),
        )
        .unwrap();
    let records = drain(merged.as_mut()).unwrap();

    // Source-by-source concatenation: duplicates survive, order is per-node.
    assert_eq!(records.len(), 3);
    assert_eq!(records[0], rec("f", "z", &[1.0]));
}

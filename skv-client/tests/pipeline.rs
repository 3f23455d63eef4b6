mod common;

use common::{assert_settled, pool, FaultKind, READONLY_REPLY, WRONGTYPE_REPLY};
use skv_client::{Command, ErrorClass, PipelineRunner, RespValue};

#[test]
fn pipeline_returns_replies_in_queue_order() {
    let (pool, store) = pool(1);
    store.put("a", "1");

    let replies = pool
        .pipeline(|pipe| {
            pipe.queue(Command::new("GET").arg("a"));
            pipe.queue(Command::new("INCR").arg("a"));
            pipe.queue(Command::new("GET").arg("missing"));
            pipe.queue(Command::new("SET").arg("b").arg("x"));
            Ok(())
        })
        .expect("pipeline");

    assert_eq!(
        replies,
        vec![
            RespValue::Bulk(Some(b"1".to_vec())),
            RespValue::Integer(2),
            RespValue::Bulk(None),
            RespValue::Simple(b"OK".to_vec()),
        ]
    );
    assert_eq!(store.value("b").as_deref(), Some("x"));
    assert_settled(&pool);
}

#[test]
fn empty_pipeline_does_no_io() {
    let (pool, store) = pool(1);

    let replies = pool.pipeline(|_pipe| Ok(())).expect("pipeline");

    assert!(replies.is_empty());
    assert!(store.commands().is_empty());
    assert_settled(&pool);
}

#[test]
fn command_errors_stay_inline() {
    let (pool, store) = pool(1);
    store.fail_on("INCR", FaultKind::Reply(WRONGTYPE_REPLY), 1);

    let replies = pool
        .pipeline(|pipe| {
            pipe.queue(Command::new("SET").arg("a").arg("1"));
            pipe.queue(Command::new("INCR").arg("a"));
            pipe.queue(Command::new("GET").arg("a"));
            Ok(())
        })
        .expect("pipeline");

    assert_eq!(replies.len(), 3);
    assert_eq!(
        replies[1].error_message().as_deref(),
        Some(WRONGTYPE_REPLY)
    );
    assert_eq!(replies[2], RespValue::Bulk(Some(b"1".to_vec())));
    assert_eq!(pool.stats().released, 1);
    assert_settled(&pool);
}

#[test]
fn connection_failure_fails_whole_batch() {
    let (pool, store) = pool(1);
    store.fail_on("GET", FaultKind::Io, 1);

    let err = pool
        .pipeline(|pipe| {
            pipe.queue(Command::new("SET").arg("a").arg("1"));
            pipe.queue(Command::new("GET").arg("a"));
            pipe.queue(Command::new("SET").arg("b").arg("2"));
            Ok(())
        })
        .err()
        .expect("must fail");

    assert_eq!(err.unavailable_class(), Some(ErrorClass::Transient));
    assert_eq!(pool.stats().discarded, 1);
    assert_eq!(store.open_connections(), 0);
    assert_settled(&pool);
}

#[test]
fn read_only_reply_fails_batch() {
    let (pool, store) = pool(1);
    store.fail_on("SET", FaultKind::Reply(READONLY_REPLY), 1);

    let err = pool
        .pipeline(|pipe| {
            pipe.queue(Command::new("GET").arg("a"));
            pipe.queue(Command::new("SET").arg("a").arg("1"));
            Ok(())
        })
        .err()
        .expect("must fail");

    assert_eq!(err.unavailable_class(), Some(ErrorClass::ReadOnlyRejection));
    assert_eq!(pool.stats().discarded, 1);
    assert_settled(&pool);
}

#[test]
fn runner_can_flush_more_than_once() {
    let (pool, _store) = pool(1);
    let mut lease = pool.acquire().expect("acquire");
    {
        let mut pipe = PipelineRunner::new(&mut lease);
        pipe.queue(Command::new("SET").arg("k").arg("v"));
        assert_eq!(pipe.len(), 1);
        assert_eq!(pipe.flush().expect("flush").len(), 1);
        assert!(pipe.is_empty());

        pipe.queue(Command::new("GET").arg("k"));
        let replies = pipe.flush().expect("flush");
        assert_eq!(replies, vec![RespValue::Bulk(Some(b"v".to_vec()))]);
    }
    pool.release(lease);
    assert_settled(&pool);
}

#[test]
fn failed_flush_marks_lease_broken() {
    let (pool, store) = pool(1);
    store.fail_on("GET", FaultKind::Io, 1);
    let mut lease = pool.acquire().expect("acquire");
    {
        let mut pipe = PipelineRunner::new(&mut lease);
        pipe.queue(Command::new("SET").arg("a").arg("1"));
        pipe.queue(Command::new("GET").arg("a"));
        assert!(pipe.flush().is_err());
    }
    assert!(lease.is_broken());

    drop(lease);
    assert_eq!(pool.stats().discarded, 1);
    assert_eq!(pool.stats().idle, 0);
    assert_eq!(store.open_connections(), 0);
    assert_settled(&pool);
}

#[test]
fn read_only_flush_marks_lease_broken() {
    let (pool, store) = pool(1);
    store.fail_on("SET", FaultKind::Reply(READONLY_REPLY), 1);
    let mut lease = pool.acquire().expect("acquire");
    {
        let mut pipe = PipelineRunner::new(&mut lease);
        pipe.queue(Command::new("SET").arg("a").arg("1"));
        assert!(pipe.flush().is_err());
    }
    assert!(lease.is_broken());

    pool.release(lease);
    assert_eq!(pool.stats().discarded, 1);
    assert_settled(&pool);
}

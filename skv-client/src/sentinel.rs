//! # Master Discovery
//!
//! Ask every monitor which node currently accepts writes for a group and
//! settle on the address a strict majority of the answering monitors report.
//! Monitors that are down, return an error, or do not know the group abstain.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use tracing::{debug, warn};

use crate::connection::{Connection, Connector};
use crate::error::{ClientError, ClientResult};
use crate::resp::RespValue;

/// Resolves the writable master for `group` through the monitor quorum.
pub fn resolve_master<C: Connector>(
    connector: &C,
    monitors: &BTreeSet<String>,
    group: &str,
    timeout: Option<Duration>,
) -> ClientResult<String> {
    let mut reports = Vec::with_capacity(monitors.len());
    for monitor in monitors {
        match query_monitor(connector, monitor, group, timeout) {
            Ok(Some(addr)) => {
                debug!(%monitor, group, master = %addr, "monitor reported master");
                reports.push(addr);
            }
            Ok(None) => warn!(%monitor, group, "monitor does not know the group"),
            Err(err) => warn!(%monitor, group, error = %err, "monitor query failed"),
        }
    }

    elect(&reports).ok_or_else(|| ClientError::MasterNotFound {
        group: group.to_string(),
        reason: if reports.is_empty() {
            format!("none of {} monitors reported a master", monitors.len())
        } else {
            format!("no majority among {} reports", reports.len())
        },
    })
}

/// Asks one monitor for the master address of `group`.
pub fn query_monitor<C: Connector>(
    connector: &C,
    monitor: &str,
    group: &str,
    timeout: Option<Duration>,
) -> ClientResult<Option<String>> {
    let mut conn = connector.connect(monitor, timeout)?;
    let reply = conn.exec(&[b"SENTINEL", b"get-master-addr-by-name", group.as_bytes()])?;
    parse_master_reply(reply.into_result()?)
}

fn parse_master_reply(reply: RespValue) -> ClientResult<Option<String>> {
    match reply {
        RespValue::Nil | RespValue::Bulk(None) => Ok(None),
        RespValue::Array(items) => match items.as_slice() {
            [RespValue::Bulk(Some(host)), RespValue::Bulk(Some(port))] => {
                let host = String::from_utf8_lossy(host);
                let port = String::from_utf8_lossy(port);
                Ok(Some(format!("{host}:{port}")))
            }
            _ => Err(ClientError::UnexpectedResponse),
        },
        _ => Err(ClientError::UnexpectedResponse),
    }
}

/// Picks the address reported by more than half of the reports.
fn elect(reports: &[String]) -> Option<String> {
    let mut votes: BTreeMap<&str, usize> = BTreeMap::new();
    for addr in reports {
        *votes.entry(addr.as_str()).or_default() += 1;
    }
    votes
        .into_iter()
        .find(|(_, count)| count * 2 > reports.len())
        .map(|(addr, _)| addr.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reports(addrs: &[&str]) -> Vec<String> {
        addrs.iter().map(|addr| addr.to_string()).collect()
    }

    #[test]
    fn single_report_wins() {
        assert_eq!(elect(&reports(&["10.0.0.1:6379"])).as_deref(), Some("10.0.0.1:6379"));
    }

    #[test]
    fn majority_wins_over_stale_monitor() {
        let votes = reports(&["10.0.0.2:6379", "10.0.0.1:6379", "10.0.0.2:6379"]);
        assert_eq!(elect(&votes).as_deref(), Some("10.0.0.2:6379"));
    }

    #[test]
    fn split_vote_has_no_winner() {
        assert_eq!(elect(&reports(&["a:1", "b:1"])), None);
        assert_eq!(elect(&[]), None);
    }

    #[test]
    fn parses_host_port_pair() {
        let reply = RespValue::Array(vec![
            RespValue::Bulk(Some(b"10.0.0.9".to_vec())),
            RespValue::Bulk(Some(b"6380".to_vec())),
        ]);
        assert_eq!(parse_master_reply(reply).unwrap().as_deref(), Some("10.0.0.9:6380"));
        assert_eq!(parse_master_reply(RespValue::Nil).unwrap(), None);
        assert!(parse_master_reply(RespValue::Integer(1)).is_err());
    }
}

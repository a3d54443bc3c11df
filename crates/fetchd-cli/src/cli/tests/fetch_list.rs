//! Tests for fetch and list.

use super::parse;
use crate::cli::{Cli, CliCommand};
use clap::Parser;
use fetchd_core::store::{DownloadFilter, DEFAULT_PAGE_LIMIT};

#[test]
fn cli_parse_fetch_single() {
    match parse(&["fetchd", "fetch", "https://example.com/file.iso"]) {
        CliCommand::Fetch {
            urls,
            checksum_type,
            checksum,
            callback,
        } => {
            assert_eq!(urls, vec!["https://example.com/file.iso".to_string()]);
            assert!(checksum_type.is_none());
            assert!(checksum.is_none());
            assert!(callback.is_none());
        }
        _ => panic!("expected Fetch"),
    }
}

#[test]
fn cli_parse_fetch_with_options() {
    match parse(&[
        "fetchd",
        "fetch",
        "http://a/1",
        "http://a/2",
        "--checksum-type",
        "md5",
        "--checksum",
        "d41d8cd98f00b204e9800998ecf8427e",
        "--callback",
        "http://hooks/done",
    ]) {
        CliCommand::Fetch {
            urls,
            checksum_type,
            checksum,
            callback,
        } => {
            assert_eq!(urls.len(), 2);
            assert_eq!(checksum_type.as_deref(), Some("md5"));
            assert_eq!(checksum.as_deref(), Some("d41d8cd98f00b204e9800998ecf8427e"));
            assert_eq!(callback.as_deref(), Some("http://hooks/done"));
        }
        _ => panic!("expected Fetch with options"),
    }
}

#[test]
fn cli_parse_fetch_requires_url() {
    assert!(Cli::try_parse_from(["fetchd", "fetch"]).is_err());
}

#[test]
fn cli_parse_list_defaults() {
    match parse(&["fetchd", "list"]) {
        CliCommand::List {
            filter,
            offset,
            limit,
        } => {
            assert_eq!(filter, DownloadFilter::All);
            assert_eq!(offset, 0);
            assert_eq!(limit, DEFAULT_PAGE_LIMIT);
        }
        _ => panic!("expected List"),
    }
}

#[test]
fn cli_parse_list_filter_and_page() {
    match parse(&["fetchd", "list", "--filter", "in-progress", "--offset", "10", "--limit", "5"]) {
        CliCommand::List {
            filter,
            offset,
            limit,
        } => {
            assert_eq!(filter, DownloadFilter::InProgress);
            assert_eq!(offset, 10);
            assert_eq!(limit, 5);
        }
        _ => panic!("expected List with filter"),
    }
}

#[test]
fn cli_parse_list_rejects_unknown_filter() {
    assert!(Cli::try_parse_from(["fetchd", "list", "--filter", "paused"]).is_err());
}


use tempfile::tempdir;
use testutil::*;

#[test]
fn sibling_hosts_reaggregate_to_their_shared_prefix() {
    let dir = tempdir().unwrap();
    let mut log = start_line(T0);
    log.push_str(&record("10.0.0.1", "20.0.0.1", 100, 1, "6:80:*"));
    log.push_str(&record("10.0.0.2", "20.0.0.2", 100, 1, "6:80:*"));
    log.push_str(&end_line(T0 + 60));
    let path = write_log(dir.path(), "two-hosts.agr", &log);

    let out = run_agurim(&["-t", "50", "-m", "byte", path.to_str().unwrap()]);
    assert!(
        out.contains("[ 0] 10.0.0.0/24 20.0.0.0/24: 200 (100.00%)"),
        "missing /24 aggregate:\n{}",
        out
    );
    assert!(out.contains("[6:80:*] 100.00% 100.00%"), "{}", out);
    assert!(out.contains("%!AGURI-2.0"));
}

#[test]
fn reaggregated_output_round_trips_through_the_reader() {
    let dir = tempdir().unwrap();
    let mut log = start_line(T0);
    log.push_str(&record("10.0.0.1", "20.0.0.1", 100, 1, "6:80:*"));
    log.push_str(&record("10.0.0.2", "20.0.0.2", 100, 1, "6:80:*"));
    log.push_str(&end_line(T0 + 60));
    let path = write_log(dir.path(), "in.agr", &log);

    let first = run_agurim(&["-t", "50", "-m", "byte", path.to_str().unwrap()]);
    let second_in = write_log(dir.path(), "second.agr", &first);

    // threshold zero re-accepts every aggregate exactly as written
    let second = run_agurim(&["-t", "0", second_in.to_str().unwrap()]);
    assert!(
        second.contains("[ 0] 10.0.0.0/24 20.0.0.0/24: 200 (100.00%)"),
        "round trip lost the aggregate:\n{}",
        second
    );
}

#[test]
fn aggregation_interval_reports_each_period() {
    let dir = tempdir().unwrap();
    let mut log = start_line(T0);
    log.push_str(&record("10.0.0.1", "20.0.0.1", 100, 1, "6:80:*"));
    log.push_str(&end_line(T0 + 60));
    log.push_str(&start_line(T0 + 120));
    log.push_str(&record("30.0.0.1", "40.0.0.1", 70, 1, "17:53:*"));
    log.push_str(&end_line(T0 + 180));
    let path = write_log(dir.path(), "periods.agr", &log);

    let out = run_agurim(&["-i", "60", "-t", "10", path.to_str().unwrap()]);
    assert_eq!(out.matches("%!AGURI-2.0").count(), 2, "{}", out);
    assert!(out.contains("10.0.0.1 20.0.0.1: 100"));
    assert!(out.contains("30.0.0.1 40.0.0.1: 70"));
    // the second report must not re-count the first period
    assert!(!out.contains(": 170"));
}

#[test]
fn filter_keeps_only_overlapping_flows() {
    let dir = tempdir().unwrap();
    let mut log = start_line(T0);
    log.push_str(&record("10.1.1.1", "20.1.1.1", 100, 1, "6:80:*"));
    log.push_str(&record("99.1.1.1", "88.1.1.1", 50, 1, "6:80:*"));
    log.push_str(&end_line(T0 + 60));
    let path = write_log(dir.path(), "filtered.agr", &log);

    let out = run_agurim(&["-f", "10.0.0.0/8 *", "-t", "10", path.to_str().unwrap()]);
    assert!(out.contains("10.1.1.1 20.1.1.1: 100 (100.00%)"), "{}", out);
    assert!(!out.contains("99.1.1.1"));
}

#[test]
fn protocol_view_summarises_by_port_with_address_subflows() {
    let dir = tempdir().unwrap();
    let mut log = start_line(T0);
    for i in 1..=5 {
        let src = format!("10.0.{}.1", i);
        let dst = format!("20.0.{}.1", i);
        log.push_str(&record(&src, &dst, 200, 2, "6:80:*"));
    }
    log.push_str(&end_line(T0 + 60));
    let path = write_log(dir.path(), "proto.agr", &log);

    let out = run_agurim(&["-P", "-t", "15", "-m", "byte", path.to_str().unwrap()]);
    assert!(out.contains("[ 0] 6:80:*: 1000 (100.00%)"), "{}", out);
    for i in 1..=5 {
        let sub = format!("[10.0.{}.1 20.0.{}.1] 20.00% 20.00%", i, i);
        assert!(out.contains(&sub), "missing subflow {}:\n{}", sub, out);
    }
}

#[test]
fn empty_input_emits_a_header_with_zero_rate() {
    let dir = tempdir().unwrap();
    let path = write_log(dir.path(), "empty.agr", "");

    let out = run_agurim(&[path.to_str().unwrap()]);
    assert!(out.contains("%AvgRate: 0.00bps 0.00pps"), "{}", out);
    assert!(!out.contains("[ 0]"), "unexpected aggregates:\n{}", out);
}

#[test]
fn directories_are_scanned_for_inputs() {
    let dir = tempdir().unwrap();
    let mut log = start_line(T0);
    log.push_str(&record("10.0.0.1", "20.0.0.1", 100, 1, "6:80:*"));
    log.push_str(&end_line(T0 + 60));
    write_log(dir.path(), "a.agr", &log);
    write_log(dir.path(), ".hidden", "not a log");

    let out = run_agurim(&["-t", "10", dir.path().to_str().unwrap()]);
    assert!(out.contains("10.0.0.1 20.0.0.1: 100"), "{}", out);
}


use serde_json::Value;
use tempfile::tempdir;
use testutil::*;

/// A day-long window whose plotting interval resolves to ten minutes,
/// with one record in each of the first two buckets.
fn two_bucket_log() -> String {
    let mut log = start_line(T0);
    log.push_str(&record("10.0.0.1", "20.0.0.1", 100, 1, "6:80:*"));
    log.push_str(&end_line(T0 + 600));
    log.push_str(&start_line(T0 + 600));
    log.push_str(&record("10.0.0.2", "20.0.0.2", 100, 1, "6:80:*"));
    log.push_str(&end_line(T0 + 86400));
    log
}

#[test]
fn json_bins_counts_per_plot_interval() {
    let dir = tempdir().unwrap();
    let path = write_log(dir.path(), "plot.agr", &two_bucket_log());

    let out = run_agurim(&["-p", "-t", "50", path.to_str().unwrap()]);
    let doc: Value = serde_json::from_str(&out).expect("output should be JSON");

    assert_eq!(doc["nflows"], 2);
    let labels = doc["labels"].as_array().unwrap();
    assert_eq!(labels[0], "TOTAL");
    assert!(labels[1]
        .as_str()
        .unwrap()
        .contains("10.0.0.0/24 20.0.0.0/24: 200 (100.00%)"));

    let data = doc["data"].as_array().unwrap();
    assert_eq!(data.len(), 2, "{}", out);
    // [timestamp, total, cnt_flow_0]
    assert_eq!(data[0].as_array().unwrap().len(), 3);
    assert_eq!(data[0][1], 100);
    assert_eq!(data[0][2], 100);
    assert_eq!(data[1][1], 100);
    let t0 = data[0][0].as_i64().unwrap();
    let t1 = data[1][0].as_i64().unwrap();
    assert_eq!(t1 - t0, 600);
}

#[test]
fn csv_emits_commented_header_and_count_rows() {
    let dir = tempdir().unwrap();
    let path = write_log(dir.path(), "plot.agr", &two_bucket_log());

    let out = run_agurim(&["-d", "-t", "50", path.to_str().unwrap()]);
    assert!(out.contains("# %%StartTime:"), "{}", out);
    assert!(out.contains("# [ 0] 10.0.0.0/24 20.0.0.0/24"), "{}", out);

    let rows: Vec<&str> = out.lines().filter(|l| !l.starts_with('#')).collect();
    assert_eq!(rows.len(), 2, "{}", out);
    let first: Vec<&str> = rows[0].split(',').collect();
    // timestamp, total, one aggregate column
    assert_eq!(first.len(), 3);
    assert_eq!(first[1], "100");
    assert_eq!(first[2], "100");
}

#[test]
fn nflows_caps_the_reported_columns() {
    let dir = tempdir().unwrap();
    let mut log = start_line(T0);
    log.push_str(&record("10.1.1.1", "20.1.1.1", 500, 5, "6:80:*"));
    log.push_str(&record("30.1.1.1", "40.1.1.1", 300, 3, "6:80:*"));
    log.push_str(&record("50.1.1.1", "60.1.1.1", 200, 2, "6:443:*"));
    log.push_str(&end_line(T0 + 86400));
    let path = write_log(dir.path(), "many.agr", &log);

    let out = run_agurim(&["-p", "-t", "15", "-n", "1", path.to_str().unwrap()]);
    let doc: Value = serde_json::from_str(&out).unwrap();
    assert_eq!(doc["nflows"], 2);
    let labels = doc["labels"].as_array().unwrap();
    assert_eq!(labels.len(), 2);
    // the heaviest flow is the one reported
    assert!(labels[1].as_str().unwrap().contains("10.1.1.1 20.1.1.1"));
}

#[test]
fn packet_basis_bins_packet_counts() {
    let dir = tempdir().unwrap();
    let path = write_log(dir.path(), "plot.agr", &two_bucket_log());

    let out = run_agurim(&["-d", "-m", "packet", "-t", "50", path.to_str().unwrap()]);
    let rows: Vec<&str> = out.lines().filter(|l| !l.starts_with('#')).collect();
    let first: Vec<&str> = rows[0].split(',').collect();
    assert_eq!(first[1], "1", "{}", out);
}

mod common;

use common::{header, n, t, temp_config, trimmed, write_xlsx};
use chrono::NaiveDate;
use sheetmerge::{CellValue, Error, MergeJob, Workbook, merge};

#[test]
fn empty_bucket_reproduces_the_template() {
    let (_dir, config) = temp_config();
    let template = vec![header(), vec![t("0"), t("seed"), n(0.0)]];
    write_xlsx(&config.template_path(), template.clone());

    let report = merge(&MergeJob::for_version(&config, "ver1").unwrap()).unwrap();

    assert_eq!(report.rows_appended, 0);
    assert!(report.merged_files.is_empty());
    assert_eq!(
        report.output_path,
        config.bucket_dir("ver1").unwrap().join("merged_output_ver1.xlsx")
    );
    let merged = Workbook::load(&report.output_path).unwrap();
    assert_eq!(merged.rows(), template.as_slice());
}

#[test]
fn missing_bucket_directory_merges_as_empty() {
    let (_dir, config) = temp_config();
    let template = vec![header(), vec![t("0"), t("seed"), n(0.0)]];
    write_xlsx(&config.template_path(), template.clone());
    let bucket = config.bucket_dir("ver2").unwrap();
    std::fs::remove_dir_all(&bucket).unwrap();

    let report = merge(&MergeJob::for_version(&config, "ver2").unwrap()).unwrap();

    assert_eq!(report.rows_appended, 0);
    assert!(report.skipped.is_empty());
    let merged = Workbook::load(bucket.join("merged_output_ver2.xlsx")).unwrap();
    assert_eq!(merged.rows(), template.as_slice());
}

#[test]
fn date_cells_stay_dates_after_merge() {
    let (_dir, config) = temp_config();
    write_xlsx(&config.template_path(), vec![vec![t("ID"), t("Due")]]);

    let due = NaiveDate::from_ymd_opt(2024, 3, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    let bucket = config.bucket_dir("ver1").unwrap();
    write_xlsx(
        &bucket.join("a.xlsx"),
        vec![
            vec![t("ID"), t("Due")],
            vec![n(1.0), CellValue::DateTime(due)],
        ],
    );

    let report = merge(&MergeJob::for_version(&config, "ver1").unwrap()).unwrap();

    assert_eq!(report.rows_appended, 1);
    let merged = Workbook::load(&report.output_path).unwrap();
    assert_eq!(
        trimmed(merged.row(2).unwrap()),
        vec![n(1.0), CellValue::DateTime(due)]
    );
}

#[test]
fn rows_below_the_matched_header_are_appended() {
    let (_dir, config) = temp_config();
    write_xlsx(&config.template_path(), vec![header()]);

    let bucket = config.bucket_dir("ver1").unwrap();
    write_xlsx(
        &bucket.join("alice.xlsx"),
        vec![
            header(),
            vec![t("1"), t("Alice"), n(10.0)],
            vec![t("2"), t("Bob"), n(20.0)],
        ],
    );

    let report = merge(&MergeJob::for_version(&config, "ver1").unwrap()).unwrap();
    assert_eq!(report.rows_appended, 2);
    assert_eq!(report.merged_files, vec!["alice.xlsx"]);

    let merged = Workbook::load(&report.output_path).unwrap();
    assert_eq!(
        merged.rows(),
        &[
            header(),
            vec![t("1"), t("Alice"), n(10.0)],
            vec![t("2"), t("Bob"), n(20.0)],
        ]
    );
}

#[test]
fn preamble_and_blank_rows_are_dropped() {
    let (_dir, mut config) = temp_config();
    config.merge.header_row = 3;
    write_xlsx(
        &config.template_path(),
        vec![vec![t("Report")], vec![], header()],
    );

    let bucket = config.bucket_dir("ver1").unwrap();
    write_xlsx(
        &bucket.join("team.xlsx"),
        vec![
            vec![t("Team report")],
            vec![t("Prepared by"), t("Kim")],
            vec![t("1"), t("before header")],
            header(),
            vec![t("7"), t("Lee"), n(3.5)],
            vec![],
            vec![t("8"), t("Park"), n(4.0)],
        ],
    );

    let report = merge(&MergeJob::for_version(&config, "ver1").unwrap()).unwrap();
    let merged = Workbook::load(&report.output_path).unwrap();

    assert_eq!(merged.len(), 5);
    assert_eq!(trimmed(merged.row(1).unwrap()), vec![t("Report")]);
    assert!(trimmed(merged.row(2).unwrap()).is_empty());
    assert_eq!(trimmed(merged.row(3).unwrap()), header());
    assert_eq!(trimmed(merged.row(4).unwrap()), vec![t("7"), t("Lee"), n(3.5)]);
    assert_eq!(trimmed(merged.row(5).unwrap()), vec![t("8"), t("Park"), n(4.0)]);
}

#[test]
fn unmatched_and_unreadable_files_are_skipped() {
    let (_dir, config) = temp_config();
    write_xlsx(&config.template_path(), vec![header()]);

    let bucket = config.bucket_dir("ver1").unwrap();
    write_xlsx(
        &bucket.join("a_good.xlsx"),
        vec![header(), vec![t("1"), t("A"), n(1.0)]],
    );
    write_xlsx(
        &bucket.join("b_other_layout.xlsx"),
        vec![vec![t("Key"), t("Value")], vec![t("x"), t("y")]],
    );
    std::fs::write(bucket.join("c_broken.xlsx"), b"not a workbook").unwrap();
    write_xlsx(
        &bucket.join("d_good.xlsx"),
        vec![header(), vec![t("2"), t("D"), n(2.0)]],
    );

    let report = merge(&MergeJob::for_version(&config, "ver1").unwrap()).unwrap();

    assert_eq!(report.merged_files, vec!["a_good.xlsx", "d_good.xlsx"]);
    assert_eq!(report.skipped.len(), 2);
    assert_eq!(report.skipped[0].filename, "b_other_layout.xlsx");
    assert!(matches!(report.skipped[0].reason, Error::HeaderNotMatched(_)));
    assert_eq!(report.skipped[1].filename, "c_broken.xlsx");
    assert!(matches!(
        report.skipped[1].reason,
        Error::UnreadableFile { .. }
    ));

    let merged = Workbook::load(&report.output_path).unwrap();
    let ids: Vec<_> = merged.rows_from(2).map(|row| row[0].clone()).collect();
    assert_eq!(ids, vec![t("1"), t("2")]);
}

#[test]
fn numeric_header_cells_do_not_match_text() {
    let (_dir, config) = temp_config();
    write_xlsx(&config.template_path(), vec![vec![t("Year"), n(2024.0)]]);

    let bucket = config.bucket_dir("ver1").unwrap();
    write_xlsx(
        &bucket.join("text_year.xlsx"),
        vec![vec![t("Year"), t("2024")], vec![t("a"), t("b")]],
    );

    let report = merge(&MergeJob::for_version(&config, "ver1").unwrap()).unwrap();
    assert_eq!(report.rows_appended, 0);
    assert_eq!(report.skipped.len(), 1);
}

#[test]
fn template_master_and_previous_output_are_not_merged() {
    let (_dir, config) = temp_config();
    write_xlsx(&config.template_path(), vec![header()]);

    let bucket = config.bucket_dir("ver1").unwrap();
    let row = vec![t("9"), t("Dup"), n(9.0)];
    for name in ["master.xlsx", "template.xlsx", "data.xlsx"] {
        write_xlsx(&bucket.join(name), vec![header(), row.clone()]);
    }

    let job = MergeJob::for_version(&config, "ver1").unwrap();
    merge(&job).unwrap();
    // A second run must not pick up the first run's output
    let report = merge(&job).unwrap();

    assert_eq!(report.merged_files, vec!["data.xlsx"]);
    let merged = Workbook::load(&report.output_path).unwrap();
    assert_eq!(merged.len(), 2);
}

#[test]
fn buckets_do_not_share_data() {
    let (_dir, config) = temp_config();
    write_xlsx(&config.template_path(), vec![header()]);
    write_xlsx(
        &config.bucket_dir("ver2").unwrap().join("v2.xlsx"),
        vec![header(), vec![t("1"), t("Only in ver2"), n(1.0)]],
    );

    let report = merge(&MergeJob::for_version(&config, "ver1").unwrap()).unwrap();
    assert_eq!(report.rows_appended, 0);
}

#[test]
fn missing_template_fails() {
    let (_dir, config) = temp_config();
    let result = merge(&MergeJob::for_version(&config, "ver1").unwrap());
    assert!(matches!(result, Err(Error::TemplateNotFound(_))));
}

#[test]
fn blank_template_header_row_fails() {
    let (_dir, mut config) = temp_config();
    config.merge.header_row = 4;
    write_xlsx(&config.template_path(), vec![header()]);

    let result = merge(&MergeJob::for_version(&config, "ver1").unwrap());
    assert!(matches!(
        result,
        Err(Error::MissingTemplateHeader { row: 4 })
    ));
}

#[test]
fn unknown_version_is_rejected() {
    let (_dir, config) = temp_config();
    assert!(matches!(
        MergeJob::for_version(&config, "ver3"),
        Err(Error::UnknownVersion(_))
    ));
}

#[test]
fn source_rows_keep_their_own_width() {
    let (_dir, config) = temp_config();
    write_xlsx(&config.template_path(), vec![header()]);
    write_xlsx(
        &config.bucket_dir("ver1").unwrap().join("wide.xlsx"),
        vec![
            header(),
            vec![t("1")],
            vec![t("2"), t("B"), n(2.0), t("extra")],
        ],
    );

    let report = merge(&MergeJob::for_version(&config, "ver1").unwrap()).unwrap();
    let merged = Workbook::load(&report.output_path).unwrap();

    // The reader pads every row to the used range, so compare the non-blank prefix
    assert_eq!(merged.row(2).unwrap().len(), 4);
    assert_eq!(trimmed(merged.row(2).unwrap()), vec![t("1")]);
    assert_eq!(merged.row(3).unwrap()[3], CellValue::Text("extra".into()));
}

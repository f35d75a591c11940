use assert_matches::assert_matches;

use kira_omics_dashboard::domain::{
    DifferentialRecord, GroupId, GroupPair, SortKey, validate_records,
};
use kira_omics_dashboard::error::KiraError;

#[test]
fn parse_group_pair() {
    let pair = GroupPair::parse("Asymptomatic", " Mild").unwrap();
    assert_eq!(pair.group1.as_str(), "Asymptomatic");
    assert_eq!(pair.group2.as_str(), "Mild");
    assert_eq!(pair.to_string(), "Asymptomatic vs Mild");
    assert!(!pair.is_self_comparison());
}

#[test]
fn parse_group_pair_rejects_blank_member() {
    let err = GroupPair::parse("Asymptomatic", "").unwrap_err();
    assert_matches!(err, KiraError::InvalidGroup(_));
}

#[test]
fn parse_group_id_keeps_inner_spaces() {
    let group: GroupId = "Severe ICU".parse().unwrap();
    assert_eq!(group.as_str(), "Severe ICU");
}

#[test]
fn parse_sort_key() {
    assert_eq!("logFC".parse::<SortKey>().unwrap(), SortKey::LogFc);
    assert_eq!("adj_p_value".parse::<SortKey>().unwrap(), SortKey::AdjPValue);
    let err = "fold".parse::<SortKey>().unwrap_err();
    assert_matches!(err, KiraError::InvalidSortKey(_));
}

#[test]
fn record_wire_names() {
    let record: DifferentialRecord = serde_json::from_str(
        r#"{"gene":"IL6","logFC":3.1,"p_value":0.001,"adj_p_value":null}"#,
    )
    .unwrap();
    assert_eq!(record, DifferentialRecord::new("IL6", 3.1, 0.001, None));

    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json["logFC"], 3.1);
}

#[test]
fn validate_rejects_out_of_range_p_values() {
    let records = vec![DifferentialRecord::new("IL6", 3.1, 0.0, None)];
    assert!(validate_records(&records).is_err());

    let records = vec![DifferentialRecord::new("IL6", 3.1, 0.5, Some(1.5))];
    assert!(validate_records(&records).is_err());

    let records = vec![DifferentialRecord::new("IL6", 3.1, 1.0, Some(1.0))];
    assert!(validate_records(&records).is_ok());
}

#[test]
fn validate_rejects_duplicate_genes() {
    let records = vec![
        DifferentialRecord::new("IL6", 3.1, 0.001, None),
        DifferentialRecord::new("IL6", 2.9, 0.002, None),
    ];
    let message = validate_records(&records).unwrap_err();
    assert!(message.contains("duplicate gene IL6"));
}

#[test]
fn validate_rejects_non_finite_fold_change() {
    let records = vec![DifferentialRecord::new("IL6", f64::INFINITY, 0.001, None)];
    assert!(validate_records(&records).is_err());
}

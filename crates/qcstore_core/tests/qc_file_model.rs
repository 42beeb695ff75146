use qcstore_core::model::qc_file::validate_file_name;
use qcstore_core::{
    CalcType, Checksum, ChecksumAlgorithm, ModelError, OwnerKind, OwnerRef, QcFileCreate,
    QcFileStatus, QcOwner,
};
use std::str::FromStr;

#[test]
fn owner_ref_resolves_exactly_one_owner() {
    let single = OwnerRef {
        vdw_entry_id: Some(6),
        ..OwnerRef::default()
    };
    assert_eq!(single.resolve().unwrap(), QcOwner::VdwEntry(6));

    assert_eq!(
        OwnerRef::default().resolve().unwrap_err(),
        ModelError::InvalidOwner { populated: 0 }
    );
    let double = OwnerRef {
        species_id: Some(1),
        np_species_id: Some(1),
        ..OwnerRef::default()
    };
    assert_eq!(
        double.resolve().unwrap_err(),
        ModelError::InvalidOwner { populated: 2 }
    );
}

#[test]
fn owner_kinds_map_to_distinct_columns() {
    for kind in OwnerKind::ALL {
        let owner = QcOwner::new(kind, 11);
        assert_eq!(owner.kind(), kind);
        assert_eq!(owner.id(), 11);
        assert_eq!(OwnerRef::from(owner).resolve().unwrap(), owner);
    }
    assert_eq!(QcOwner::NonPhysicalSpecies(3).to_string(), "np_species#3");
}

#[test]
fn enums_parse_only_closed_values() {
    assert_eq!(CalcType::from_str("irc").unwrap(), CalcType::Irc);
    assert_eq!(
        CalcType::from_str("md").unwrap_err(),
        ModelError::UnknownCalcType("md".to_string())
    );
    assert_eq!(QcFileStatus::from_str("failed").unwrap(), QcFileStatus::Failed);
    assert!(QcFileStatus::from_str("done").is_err());
    assert_eq!(QcFileStatus::default(), QcFileStatus::Pending);
}

#[test]
fn checksum_parse_normalizes_case_and_rejects_garbage() {
    let upper = "AB".repeat(32);
    assert_eq!(Checksum::parse(&upper).unwrap().as_str(), "ab".repeat(32));

    assert!(Checksum::parse("abc").is_err());
    assert!(Checksum::parse(&"g".repeat(64)).is_err());
}

#[test]
fn placeholder_depends_on_owner_kind_and_calc_type() {
    let algorithm = ChecksumAlgorithm::Sha256;
    let species = Checksum::placeholder(QcOwner::Species(7), CalcType::Opt, algorithm);

    assert_eq!(
        species,
        Checksum::placeholder(QcOwner::Species(7), CalcType::Opt, algorithm)
    );
    assert_ne!(
        species,
        Checksum::placeholder(QcOwner::TransitionState(7), CalcType::Opt, algorithm)
    );
    assert_ne!(
        species,
        Checksum::placeholder(QcOwner::Species(7), CalcType::Freq, algorithm)
    );
}

#[test]
fn file_names_are_checked() {
    assert!(validate_file_name("input_name", None).is_ok());
    assert!(validate_file_name("input_name", Some("opt.gjf")).is_ok());
    assert!(validate_file_name("input_name", Some("   ")).is_err());
    assert!(validate_file_name("output_name", Some("a\tb")).is_err());
    assert!(validate_file_name("output_name", Some(&"x".repeat(256))).is_err());
}

#[test]
fn create_request_deserializes_from_client_json() {
    let request: QcFileCreate = serde_json::from_value(serde_json::json!({
        "transition_state_id": 4,
        "calc_type": "freq",
        "level_id": 9,
        "ess_id": 3,
        "output_name": "ts.log",
        "output_file": [79, 75],
    }))
    .unwrap();

    assert_eq!(request.owner_ref().resolve().unwrap(), QcOwner::TransitionState(4));
    assert_eq!(request.calc_type, CalcType::Freq);
    assert_eq!(request.status, None);
    assert_eq!(request.output_file.as_deref(), Some(&b"OK"[..]));
}

#[test]
fn owner_serializes_as_tagged_kind() {
    let json = serde_json::to_value(QcOwner::Species(42)).unwrap();
    assert_eq!(json["kind"], "species");
    assert_eq!(json["id"], 42);
}

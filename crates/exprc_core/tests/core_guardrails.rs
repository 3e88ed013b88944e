use std::collections::HashMap;

use exprc_core::faults;
use exprc_core::num::{ArithOp, Num, NumFault, NumKind};
use exprc_core::switch::{SwitchKey, bucket_count, bucket_of};

#[test]
fn fault_names_unique_and_resolvable() {
    let mut seen: HashMap<&'static str, faults::FaultKind> = HashMap::new();

    for info in faults::FAULTS {
        assert_eq!(
            faults::from_str(info.canonical),
            Some(info.id),
            "fault canonical spelling not resolvable: {}",
            info.canonical
        );
        assert_eq!(
            faults::as_str(info.id),
            info.canonical,
            "fault as_str mismatch for {:?}",
            info.id
        );
        assert!(
            info.canonical.ends_with("Exception"),
            "fault type name should end with Exception: {}",
            info.canonical
        );
        assert!(!info.message.is_empty(), "fault {:?} has no default message", info.id);

        if let Some(prev) = seen.insert(info.canonical, info.id) {
            panic!(
                "duplicate fault spelling {:?}: {:?} and {:?}",
                info.canonical, prev, info.id
            );
        }
    }
}

#[test]
fn fault_registry_is_ordered_like_the_enum() {
    for (index, info) in faults::FAULTS.iter().enumerate() {
        assert_eq!(info.id as usize, index, "registry out of order at {}", info.canonical);
    }
}

#[test]
fn numeric_faults_map_to_exception_kinds() {
    assert_eq!(NumFault::Overflow.fault_kind(), faults::FaultKind::Overflow);
    assert_eq!(NumFault::DivideByZero.fault_kind(), faults::FaultKind::DivideByZero);
}

#[test]
fn integer_kinds_report_division_faults_in_both_modes() {
    for kind in NumKind::ALL.into_iter().filter(|k| k.is_integral()) {
        for checked in [false, true] {
            let one = Num::one(kind);
            let zero = Num::zero(kind);
            assert_eq!(
                one.arith(ArithOp::Div, zero, checked),
                Err(NumFault::DivideByZero),
                "{} / 0 (checked = {})",
                kind,
                checked
            );
            assert_eq!(
                one.arith(ArithOp::Rem, zero, checked),
                Err(NumFault::DivideByZero),
                "{} % 0 (checked = {})",
                kind,
                checked
            );
        }
    }
}

#[test]
fn il_suffixes_unique() {
    let mut seen = HashMap::new();
    for kind in NumKind::ALL {
        if let Some(prev) = seen.insert(kind.il_suffix(), kind) {
            panic!("duplicate suffix {}: {:?} and {:?}", kind.il_suffix(), prev, kind);
        }
    }
}

#[test]
fn switch_buckets_cover_every_case_value() {
    let values: Vec<i64> = (0..9).map(|v| v * 10).collect();
    let size = bucket_count(values.len());
    let mut buckets = vec![0usize; size as usize];
    for v in &values {
        buckets[bucket_of(SwitchKey::Int(*v), size) as usize] += 1;
    }
    assert_eq!(buckets.iter().sum::<usize>(), values.len());
}

use super::encode::{Error, MajorType};
use super::nesting::{Nesting, MAX_NESTING};

#[test]
fn sentinel_accepts_top_level_items() {
    let mut nesting = Nesting::new();

    assert!(!nesting.in_nest());
    assert_eq!(nesting.major_type(), MajorType::Array);
    nesting.increment(1).unwrap();
    nesting.increment(1).unwrap();
    assert_eq!(nesting.count_for_header(), 2);
    assert!(!nesting.in_nest());
}

#[test]
fn depth_limit() {
    let mut nesting = Nesting::new();

    for depth in 0..MAX_NESTING {
        assert_eq!(nesting.push(MajorType::Array, depth as u32), Ok(()));
    }
    assert_eq!(
        nesting.push(MajorType::Array, 99),
        Err(Error::NestingTooDeep)
    );

    assert_eq!(nesting.start_pos(), MAX_NESTING as u32 - 1);
    for _ in 0..MAX_NESTING {
        nesting.pop();
    }
    assert!(!nesting.in_nest());
}

#[test]
fn map_count_is_pairs() {
    let mut nesting = Nesting::new();

    nesting.push(MajorType::Map, 0).unwrap();
    for _ in 0..4 {
        nesting.increment(1).unwrap();
    }
    assert_eq!(nesting.count_for_header(), 2);

    // The enclosing frame saw nothing.
    nesting.pop();
    assert_eq!(nesting.count_for_header(), 0);
}

#[test]
fn item_count_limit() {
    let mut nesting = Nesting::new();

    nesting.push(MajorType::Array, 0).unwrap();
    assert_eq!(nesting.increment(65534), Ok(()));
    assert_eq!(nesting.increment(1), Err(Error::ArrayTooLong));
    assert_eq!(nesting.count_for_header(), 65534);
}

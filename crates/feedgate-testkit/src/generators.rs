//! Proptest generators for property-based testing.

use proptest::prelude::*;

use feedgate_core::{CounterKey, ResourceId, StatusRecord, SubjectId};

/// A raw identifier that is valid as a key segment.
pub fn segment() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_.:-]{1,24}"
}

/// A raw string containing a `/`, which no identifier may hold.
pub fn slashed_segment() -> impl Strategy<Value = String> {
    ("[A-Za-z0-9]{0,8}", "[A-Za-z0-9]{0,8}").prop_map(|(a, b)| format!("{}/{}", a, b))
}

pub fn resource_id() -> impl Strategy<Value = ResourceId> {
    segment().prop_map(|s| ResourceId::new(s).expect("segment strategy yields valid ids"))
}

pub fn subject_id() -> impl Strategy<Value = SubjectId> {
    segment().prop_map(|s| SubjectId::new(s).expect("segment strategy yields valid ids"))
}

pub fn counter_key() -> impl Strategy<Value = CounterKey> {
    (resource_id(), subject_id()).prop_map(|(resource, subject)| CounterKey::new(resource, subject))
}

/// Every distinguishable cached status.
pub fn status_record() -> impl Strategy<Value = StatusRecord> {
    prop_oneof![
        Just(StatusRecord::UNKNOWN),
        Just(StatusRecord::registered(false)),
        Just(StatusRecord::registered(true)),
    ]
}

/// One recorded burst of accesses.
#[derive(Debug, Clone)]
pub struct AccessParams {
    pub resource: String,
    pub subject: String,
    pub count: u64,
}

impl Arbitrary for AccessParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        // Small id pools so subjects and resources collide often.
        ("R[0-4]", "U[0-3]", 1u64..50)
            .prop_map(|(resource, subject, count)| AccessParams {
                resource,
                subject,
                count,
            })
            .boxed()
    }
}

/// A sequence of access bursts.
pub fn access_plan(max_len: usize) -> impl Strategy<Value = Vec<AccessParams>> {
    prop::collection::vec(any::<AccessParams>(), 0..=max_len)
}

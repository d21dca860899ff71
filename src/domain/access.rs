use crate::domain::models::{Record, Role, SessionIdentity};

fn same_person(left: &str, right: &str) -> bool {
    let left = left.trim();
    !left.is_empty() && left.eq_ignore_ascii_case(right.trim())
}

/// Supervisors are linked to records by display name, and tolerate their
/// username being used instead.
pub fn supervises(identity: &SessionIdentity, record: &Record) -> bool {
    identity.role == Role::Supervisor
        && (same_person(&record.supervisor, &identity.full_name)
            || same_person(&record.supervisor, &identity.username))
}

pub fn owns(identity: &SessionIdentity, record: &Record) -> bool {
    same_person(&record.owner_username, &identity.username)
}

pub fn can_view(identity: &SessionIdentity, record: &Record) -> bool {
    match identity.role {
        Role::Coordinator => true,
        Role::Supervisor => supervises(identity, record) || owns(identity, record),
        Role::Employee => owns(identity, record),
    }
}

pub fn can_review(identity: &SessionIdentity, record: &Record) -> bool {
    match identity.role {
        Role::Coordinator => true,
        Role::Supervisor => supervises(identity, record),
        Role::Employee => false,
    }
}

/// Owners may withdraw a record only while nobody has decided on it.
pub fn can_delete(identity: &SessionIdentity, record: &Record) -> bool {
    owns(identity, record) && record.is_pending()
}

pub fn visible_records(identity: &SessionIdentity, records: &[Record]) -> Vec<Record> {
    records
        .iter()
        .filter(|record| can_view(identity, record))
        .cloned()
        .collect()
}

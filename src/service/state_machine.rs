// service/state_machine.rs
use crate::models::referralmodel::ReferralStatus;

/// Lifecycle event types reported by client and vendor SDKs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Click,
    Install,
    Open,
    Registered,
    Redeemed,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Click,
        EventKind::Install,
        EventKind::Open,
        EventKind::Registered,
        EventKind::Redeemed,
    ];

    pub fn to_str(&self) -> &'static str {
        match self {
            EventKind::Click => "click",
            EventKind::Install => "install",
            EventKind::Open => "open",
            EventKind::Registered => "registered",
            EventKind::Redeemed => "redeemed",
        }
    }

    /// Exact, case-sensitive match on the wire name.
    pub fn parse(event_type: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.to_str() == event_type)
    }

    pub fn target_status(&self) -> ReferralStatus {
        match self {
            EventKind::Click => ReferralStatus::Clicked,
            EventKind::Install => ReferralStatus::Installed,
            EventKind::Open => ReferralStatus::Open,
            EventKind::Registered => ReferralStatus::Registered,
            EventKind::Redeemed => ReferralStatus::Redeemed,
        }
    }
}

/// Next status for a record at `current` after an event of `event_type`.
///
/// Forward-only: the mapped target wins only when it sits strictly later in
/// [`ReferralStatus::LIFECYCLE`] than `current`, otherwise `current` is kept.
/// Unknown event types are no-ops. A record with no status yet starts at the
/// mapped target, or `Invited` when the event type is unknown. `Rejected` is
/// never left.
pub fn advance(current: Option<ReferralStatus>, event_type: &str) -> ReferralStatus {
    if current == Some(ReferralStatus::Rejected) {
        return ReferralStatus::Rejected;
    }

    let target = match EventKind::parse(event_type) {
        Some(kind) => kind.target_status(),
        None => current.unwrap_or(ReferralStatus::Invited),
    };

    let current_index = current
        .and_then(|status| status.order_index())
        .map_or(-1, |index| index as i64);
    let target_index = target.order_index().map_or(-1, |index| index as i64);

    match current {
        Some(status) if target_index <= current_index => status,
        _ => target,
    }
}

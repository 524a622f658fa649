use chatrelay_traits::UserType;

pub const QUOTA_WINDOW_HOURS: u32 = 24;
pub const QUOTA_EXCEEDED: &str =
    "You have exceeded your maximum number of messages for the day! Please try again later.";

#[derive(Debug, Clone, Copy)]
pub struct Entitlements {
    pub max_messages_per_day: u64,
}

pub fn entitlements_for(user_type: UserType) -> Entitlements {
    match user_type {
        UserType::Guest => Entitlements {
            max_messages_per_day: 5,
        },
        UserType::Regular => Entitlements {
            max_messages_per_day: 50,
        },
    }
}

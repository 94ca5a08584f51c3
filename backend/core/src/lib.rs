pub mod activity;
pub mod error;
pub mod event;
pub mod filter;

pub use activity::{
    ActivityCount, ChannelSet, DateBucket, DisplayMeta, GuildActivity, LeafUpdate, UserBucket,
};
pub use error::TallyError;
pub use event::{current_day, ActivityEvent};
pub use filter::{filter_activity, sum_counts, FilteredChannels, FilteredUser};

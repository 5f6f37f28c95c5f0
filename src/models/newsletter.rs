//! Newsletter subscribers and campaigns

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

string_enum! {
    pub enum SubscriberStatus {
        Subscribed => "subscribed",
        Unsubscribed => "unsubscribed",
    }
}

string_enum! {
    pub enum CampaignStatus {
        Draft => "draft",
        Sending => "sending",
        Sent => "sent",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Subscriber {
    pub id: i64,
    pub email: String,
    pub name: Option<String>,
    pub status: SubscriberStatus,
    #[serde(skip_serializing, default)]
    pub unsubscribe_token: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: i64,
    pub subject: String,
    pub content: String,
    pub status: CampaignStatus,
    pub recipient_count: i64,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignInput {
    pub subject: Option<String>,
    pub content: Option<String>,
}

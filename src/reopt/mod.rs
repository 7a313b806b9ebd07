pub mod campaign;
pub mod client;
pub mod payload;

pub use campaign::{CampaignSummary, ReoptCampaign};
pub use client::{ReoptClient, ReoptError};

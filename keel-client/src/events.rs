//! Event submission

use crate::KeelClient;
use crate::error::Result;
use keel_core::domain::trigger::Event;
use keel_core::dto::event::EventAccepted;

impl KeelClient {
    /// Submit an event; the server starts a run for every matching pipeline
    ///
    /// A malformed event is rejected with status 400.
    pub async fn submit_event(&self, event: &Event) -> Result<EventAccepted> {
        let url = format!("{}/events", self.base_url);
        let response = self.client.post(&url).json(event).send().await?;

        self.handle_response(response).await
    }
}

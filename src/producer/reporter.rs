use crate::storage::CameraUpdate;

/// Posts people counts to the aggregator.
///
/// Delivery is at-most-once: a failed post is logged and dropped, never
/// retried, and response bodies are ignored.
#[derive(Clone)]
pub struct CountReporter {
    client: reqwest::Client,
    url: String,
    camera_id: String,
    latitude: f64,
    longitude: f64,
}

impl CountReporter {
    pub fn new(
        client: reqwest::Client,
        url: String,
        camera_id: String,
        (latitude, longitude): (f64, f64),
    ) -> Self {
        Self {
            client,
            url,
            camera_id,
            latitude,
            longitude,
        }
    }

    pub fn update(&self, people_count: i64) -> CameraUpdate {
        CameraUpdate {
            camera_id: self.camera_id.clone(),
            latitude: self.latitude,
            longitude: self.longitude,
            people_count,
        }
    }

    /// Returns whether the aggregator accepted the count.
    pub async fn report(&self, people_count: i64) -> bool {
        let result = self
            .client
            .post(&self.url)
            .json(&self.update(people_count))
            .send()
            .await
            .and_then(|r| r.error_for_status());

        match result {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(camera = %self.camera_id, error = %e, "count report dropped");
                false
            }
        }
    }
}

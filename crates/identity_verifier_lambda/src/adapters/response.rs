use identity_verifier_core::contract::CloudFormationResponse;

pub trait ResponseSink {
    /// Uploads the response document to the pre-signed URL CloudFormation
    /// handed to the custom resource.
    fn send(&self, response_url: &str, response: &CloudFormationResponse) -> Result<(), String>;
}

pub struct PresignedUrlResponseSink {
    http_client: reqwest::Client,
}

impl PresignedUrlResponseSink {
    pub fn new(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

impl ResponseSink for PresignedUrlResponseSink {
    fn send(&self, response_url: &str, response: &CloudFormationResponse) -> Result<(), String> {
        let body = serde_json::to_vec(response)
            .map_err(|error| format!("failed to serialize custom resource response: {error}"))?;
        let client = self.http_client.clone();
        let url = response_url.to_string();

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                // The pre-signed URL is signed without a content type.
                client
                    .put(url)
                    .header(reqwest::header::CONTENT_TYPE, "")
                    .body(body)
                    .send()
                    .await
                    .and_then(reqwest::Response::error_for_status)
                    .map(|_| ())
                    .map_err(|error| format!("failed to upload custom resource response: {error}"))
            })
        })
    }
}

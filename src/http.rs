//! Narrow HTTP interface used by the catalogue, token and OData clients.
use crate::error::TransportError;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == 401 || self.status == 403
    }
}

pub trait HttpClient {
    async fn get(&self, url: &Url, bearer: Option<&str>) -> Result<HttpResponse, TransportError>;

    async fn post_form(
        &self,
        url: &Url,
        form: &[(&str, &str)],
    ) -> Result<HttpResponse, TransportError>;
}

impl<T: HttpClient> HttpClient for Arc<T> {
    async fn get(&self, url: &Url, bearer: Option<&str>) -> Result<HttpResponse, TransportError> {
        (**self).get(url, bearer).await
    }

    async fn post_form(
        &self,
        url: &Url,
        form: &[(&str, &str)],
    ) -> Result<HttpResponse, TransportError> {
        (**self).post_form(url, form).await
    }
}

/// `reqwest` backed client. Every request carries the configured timeout.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: Client,
}

impl ReqwestClient {
    pub fn new(timeout: Duration, connect_timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(concat!("dataspace-downloader/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    async fn get(&self, url: &Url, bearer: Option<&str>) -> Result<HttpResponse, TransportError> {
        let mut request = self.client.get(url.clone());
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse { status, body })
    }

    async fn post_form(
        &self,
        url: &Url,
        form: &[(&str, &str)],
    ) -> Result<HttpResponse, TransportError> {
        let response = self.client.post(url.clone()).form(form).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Method {
        Get,
        Post,
    }

    #[derive(Debug, Clone)]
    pub struct MockRequest {
        pub method: Method,
        pub url: Url,
        pub bearer: Option<String>,
        pub form: Vec<(String, String)>,
    }

    impl MockRequest {
        pub fn form_value(&self, key: &str) -> Option<&str> {
            self.form
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        }

        pub fn query_value(&self, key: &str) -> Option<String> {
            self.url
                .query_pairs()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.into_owned())
        }
    }

    type Handler = dyn Fn(&MockRequest) -> Result<HttpResponse, TransportError> + Send + Sync;

    /// Serves canned responses from a closure and records every request it sees.
    pub struct MockHttp {
        handler: Box<Handler>,
        requests: Mutex<Vec<MockRequest>>,
    }

    impl MockHttp {
        pub fn new(
            handler: impl Fn(&MockRequest) -> Result<HttpResponse, TransportError>
                + Send
                + Sync
                + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                handler: Box::new(handler),
                requests: Mutex::new(vec![]),
            })
        }

        pub fn requests(&self) -> Vec<MockRequest> {
            self.requests.lock().unwrap().clone()
        }

        fn serve(&self, request: MockRequest) -> Result<HttpResponse, TransportError> {
            let response = (self.handler)(&request);
            self.requests.lock().unwrap().push(request);
            response
        }
    }

    impl HttpClient for MockHttp {
        async fn get(
            &self,
            url: &Url,
            bearer: Option<&str>,
        ) -> Result<HttpResponse, TransportError> {
            // Suspend once like a real round trip so concurrent callers interleave.
            tokio::task::yield_now().await;
            self.serve(MockRequest {
                method: Method::Get,
                url: url.clone(),
                bearer: bearer.map(str::to_owned),
                form: vec![],
            })
        }

        async fn post_form(
            &self,
            url: &Url,
            form: &[(&str, &str)],
        ) -> Result<HttpResponse, TransportError> {
            tokio::task::yield_now().await;
            self.serve(MockRequest {
                method: Method::Post,
                url: url.clone(),
                bearer: None,
                form: form
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            })
        }
    }
}

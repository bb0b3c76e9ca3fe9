use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::cache::credential::Credential;
use crate::directory::{DirectoryClient, DirectoryUser, PatchOp, PASSWORD_PATH};
use crate::error::DirectoryError;

const SCIM_CONTENT_TYPE: &str = "application/scim+json";
const PATCH_OP_SCHEMA: &str = "urn:ietf:params:scim:api:messages:2.0:PatchOp";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListResponse {
    #[serde(default)]
    resources: Vec<DirectoryUser>,
}

/// `reqwest` adapter for a SCIM `/Users` endpoint.
#[derive(Debug, Clone)]
pub struct ScimDirectoryClient {
    base_url: Url,
    client: Client,
}

impl ScimDirectoryClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url).with_context(|| format!("invalid directory base url '{}'", base_url))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("directory base url '{}' cannot carry a path", base_url));
        }
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("failed to build directory HTTP client")?;
        Ok(Self { base_url, client })
    }

    fn url_with(&self, segments: &[&str]) -> Result<Url, DirectoryError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| DirectoryError::Unavailable(format!("directory base url '{}' cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn users_url(&self) -> Result<Url, DirectoryError> {
        self.url_with(&["Users"])
    }

    /// The id always stays one path segment: `/` and `%` are encoded, and the
    /// dot segments that would be dropped on normalisation are refused.
    fn user_url(&self, id: &str) -> Result<Url, DirectoryError> {
        if id.is_empty() || id == "." || id == ".." {
            return Err(DirectoryError::NotFound(format!("invalid user id '{}'", id)));
        }
        self.url_with(&["Users", id])
    }

    fn authorized(&self, request: RequestBuilder, credential: &Credential) -> RequestBuilder {
        request
            .header(header::AUTHORIZATION, credential.bearer())
            .header(header::CONTENT_TYPE, SCIM_CONTENT_TYPE)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, DirectoryError> {
        let response = request
            .send()
            .await
            .map_err(|err| DirectoryError::Unavailable(err.to_string()))?;
        check_status(response).await
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, DirectoryError> {
        self.send(request)
            .await?
            .json::<T>()
            .await
            .map_err(|err| DirectoryError::Unavailable(format!("unreadable directory response: {}", err)))
    }
}

/// Maps the remote status onto the directory error kinds, keeping the
/// directory's own `detail` message.
async fn check_status(response: Response) -> Result<Response, DirectoryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let detail = error_detail(&body).unwrap_or_else(|| status.to_string());
    debug!("directory answered {}: {}", status, detail);

    Err(match status {
        StatusCode::NOT_FOUND => DirectoryError::NotFound(detail),
        s if s.is_client_error() => DirectoryError::Rejected { status: s.as_u16(), detail },
        _ => DirectoryError::Unavailable(detail),
    })
}

fn error_detail(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("detail")
        .and_then(Value::as_str)
        .map(str::to_owned)
}

#[async_trait]
impl DirectoryClient for ScimDirectoryClient {
    async fn list_users(&self, credential: &Credential, filter: &str) -> Result<Vec<DirectoryUser>, DirectoryError> {
        let request = self
            .authorized(self.client.get(self.users_url()?), credential)
            .query(&[("filter", filter)]);
        let list: ListResponse = self.send_json(request).await?;
        Ok(list.resources)
    }

    async fn get_user(&self, credential: &Credential, id: &str) -> Result<DirectoryUser, DirectoryError> {
        let request = self.authorized(self.client.get(self.user_url(id)?), credential);
        self.send_json(request).await
    }

    async fn modify_user(
        &self,
        credential: &Credential,
        id: &str,
        ops: &[PatchOp],
        version: Option<&str>,
    ) -> Result<DirectoryUser, DirectoryError> {
        let body = json!({
            "schemas": [PATCH_OP_SCHEMA],
            "Operations": ops,
        });
        let mut request = self
            .authorized(self.client.patch(self.user_url(id)?), credential)
            .json(&body);
        if let Some(version) = version {
            request = request.header(header::IF_MATCH, version);
        }
        self.send_json(request).await
    }

    async fn delete_user(&self, credential: &Credential, id: &str) -> Result<(), DirectoryError> {
        let request = self.authorized(self.client.delete(self.user_url(id)?), credential);
        self.send(request).await.map(|_| ())
    }

    async fn change_password(
        &self,
        credential: &Credential,
        id: &str,
        username: &str,
        _old_password: &str,
        new_password: &str,
    ) -> Result<DirectoryUser, DirectoryError> {
        // plain SCIM cannot verify the old password; the id/userName pairing is checked here
        let user = self.get_user(credential, id).await?;
        if user.user_name != username {
            return Err(DirectoryError::Rejected {
                status: StatusCode::CONFLICT.as_u16(),
                detail: "username does not match the user id".to_owned(),
            });
        }
        let ops = [PatchOp::replace(PASSWORD_PATH, json!(new_password))];
        self.modify_user(credential, id, &ops, user.version()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ScimDirectoryClient {
        ScimDirectoryClient::new("https://idp.test/identity/restv1/scim/v2/", Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn user_id_is_a_single_encoded_segment() {
        let scim = client();
        assert_eq!(
            scim.user_url("u-1").unwrap().as_str(),
            "https://idp.test/identity/restv1/scim/v2/Users/u-1"
        );
        assert_eq!(
            scim.user_url("../Groups/x").unwrap().as_str(),
            "https://idp.test/identity/restv1/scim/v2/Users/..%2FGroups%2Fx"
        );
        assert_eq!(
            scim.user_url("..%2FGroups%2Fx").unwrap().as_str(),
            "https://idp.test/identity/restv1/scim/v2/Users/..%252FGroups%252Fx"
        );
    }

    #[test]
    fn dot_segments_are_refused() {
        let scim = client();
        for id in ["", ".", ".."] {
            assert!(matches!(scim.user_url(id), Err(DirectoryError::NotFound(_))), "id {:?}", id);
        }
    }

    #[test]
    fn base_url_must_be_hierarchical() {
        assert!(ScimDirectoryClient::new("mailto:ops@idp.test", Duration::from_secs(1)).is_err());
        assert!(ScimDirectoryClient::new("not a url", Duration::from_secs(1)).is_err());
    }
}

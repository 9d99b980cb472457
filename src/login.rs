use crate::{AuthorizationEndpoint, code_verifier::PkceParams, flow_state::FlowState};
use itertools::Itertools;
use url::Url;

const DEFAULT_SCOPES: [&str; 3] = ["openid", "profile", "email"];

/// `openid profile email`, followed by any additional scopes. Duplicates are dropped.
pub(crate) fn scope(additional_scopes: &[String]) -> String {
    DEFAULT_SCOPES
        .into_iter()
        .chain(additional_scopes.iter().map(|it| it.trim()))
        .filter(|it| !it.is_empty())
        .unique()
        .join(" ")
}

pub(crate) fn create_login_url(
    authorization_endpoint: &AuthorizationEndpoint,
    client_id: &str,
    redirect_uri: &str,
    scope: &str,
    flow_state: &FlowState,
    pkce: &PkceParams,
) -> Url {
    let mut login_url: Url = authorization_endpoint.clone();
    {
        let mut query = login_url.query_pairs_mut();
        query
            .append_pair("response_type", "code")
            .append_pair("client_id", client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("scope", scope)
            .append_pair("state", flow_state.state())
            .append_pair("nonce", flow_state.nonce())
            .append_pair("access_type", "offline");
        for (key, value) in pkce.authorization_params() {
            query.append_pair(key, value);
        }
    }
    login_url
}

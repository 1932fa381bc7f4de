//! Azure-compatible blob container authenticated with a shared access signature

use std::sync::Arc;

use object_store::azure::{AzureConfigKey, MicrosoftAzureBuilder};
use object_store::{ClientConfigKey, ClientOptions, RetryConfig};

use super::connection::ConnectionString;
use super::store::StoreContainer;
use crate::app::client::{ClientConfig, RetryPolicy};
use crate::errors::{ConfigError, ConfigResult};

/// Build a container client for `container` under the connection's endpoint
///
/// The signature in the connection string is the only credential sent. HTTP
/// tuning and retries follow the same settings as the cache service client.
///
/// # Errors
///
/// Returns `ConfigError::InvalidConnectionString` if the container name is
/// unusable or the store rejects the endpoint or signature.
pub fn azure_container(
    connection: &ConnectionString,
    container: &str,
    client: &ClientConfig,
    retry: &RetryPolicy,
) -> ConfigResult<StoreContainer> {
    let container_url = connection.container_url(container)?;

    let store = MicrosoftAzureBuilder::new()
        .with_account(connection.account.clone())
        .with_container_name(container)
        .with_config(AzureConfigKey::Endpoint, connection.endpoint())
        .with_config(AzureConfigKey::SasKey, connection.sas.clone())
        .with_client_options(client_options(client, connection.is_http()))
        .with_retry(retry_config(retry))
        .build()
        .map_err(|e| ConfigError::InvalidConnectionString {
            reason: e.to_string(),
        })?;

    Ok(StoreContainer::new(Arc::new(store)).with_signed_url(container_url, connection.sas.clone()))
}

fn client_options(client: &ClientConfig, allow_http: bool) -> ClientOptions {
    // Blob downloads can run far longer than any fixed request timeout; the
    // container applies its own stall timeout while streaming
    let mut options = ClientOptions::new()
        .with_config(ClientConfigKey::UserAgent, client.user_agent.clone())
        .with_connect_timeout(client.connect_timeout)
        .with_pool_max_idle_per_host(client.pool_max_per_host)
        .with_timeout_disabled()
        .with_allow_http(allow_http);

    if let Some(idle_timeout) = client.pool_idle_timeout {
        options = options.with_pool_idle_timeout(idle_timeout);
    }
    options
}

fn retry_config(retry: &RetryPolicy) -> RetryConfig {
    let mut config = RetryConfig::default();
    config.max_retries = retry.max_attempts.saturating_sub(1) as usize;
    config.backoff.init_backoff = retry.base_delay;
    config.backoff.max_backoff = retry.max_delay;
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::storage::ObjectContainer;

    fn connection(raw: &str) -> ConnectionString {
        ConnectionString::parse(raw).unwrap()
    }

    #[test]
    fn test_emulator_container() {
        let conn = connection(
            "BlobEndpoint=http://127.0.0.1:10000/devstoreaccount1;SharedAccessSignature=sv=2021&sig=abc",
        );
        let container =
            azure_container(&conn, "caches", &ClientConfig::default(), &RetryPolicy::default())
                .unwrap();

        let url = container.blob_url("v1/key").unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:10000/devstoreaccount1/caches/v1/key?sv=2021&sig=abc"
        );
    }

    #[test]
    fn test_invalid_container_name() {
        let conn = connection(
            "BlobEndpoint=https://acct.blob.core.windows.net/;SharedAccessSignature=sv=1&sig=x",
        );
        let result = azure_container(&conn, "a/b", &ClientConfig::default(), &RetryPolicy::default());
        assert!(matches!(
            result,
            Err(ConfigError::InvalidConnectionString { .. })
        ));
    }

    #[test]
    fn test_retry_budget_matches_policy() {
        let config = retry_config(&RetryPolicy::immediate(3));
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.backoff.max_backoff, std::time::Duration::from_millis(1));

        let single = retry_config(&RetryPolicy::immediate(1));
        assert_eq!(single.max_retries, 0);
    }
}

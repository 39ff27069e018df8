use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use itertools::Itertools;
use log::debug;
use serde::Deserialize;
use serde_json::Value;
use serde_with::{serde_as, DefaultOnNull};

use crate::attribute_value::{AttributeValue, Attributes};
use crate::environment::{Env, Environment};
use crate::error::{Error, ErrorHandler, LogErrorHandler, Result};
use crate::flag::{override_name, Flag};
use crate::flag_set::FlagSet;
use crate::traffic::{MatchingKey, TrafficType};
use crate::transport::{HttpTransport, Request, Transport, TransportError};

/// Path of the endpoint that resolves every flag for one traffic key.
pub const ENDPOINT_PATH: &str = "/client/get-all-treatments-with-config";

/// How long the flag request may take before it counts as a network error.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

#[serde_as]
#[derive(Debug, Deserialize)]
struct TreatmentWithConfig {
    #[serde(default)]
    treatment: Option<String>,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    config: String,
}

enum FetchState {
    Unfetched,
    Fetched(Arc<FlagSet>),
    Failed,
}

/// Service resolves the flags that apply to one traffic key.
///
/// All flags are requested from the server with a single call the first time any flag is looked
/// up; every later lookup is answered from that snapshot. The call is made at most once per
/// Service, even if it fails and even if several threads look up flags at the same time.
///
/// By default a failed fetch is handed to the [ErrorHandler] and then ignored, so every flag
/// looks like an unknown flag. Use [Service::throw_on_errors] to get the failure back from the
/// lookup that triggered the fetch as well.
pub struct Service {
    transport: Box<dyn Transport>,
    traffic_type: TrafficType,
    traffic_key: AttributeValue,
    attributes: Attributes,
    timeout: Duration,
    error_handler: Arc<dyn ErrorHandler>,
    env: Env,
    throw_on_errors: bool,
    state: Mutex<FetchState>,
}

impl Service {
    pub fn new(
        transport: impl Transport + 'static,
        traffic_type: TrafficType,
        traffic_key: impl Into<AttributeValue>,
        attributes: Attributes,
    ) -> Self {
        Self {
            transport: Box::new(transport),
            traffic_type,
            traffic_key: traffic_key.into(),
            attributes,
            timeout: DEFAULT_TIMEOUT,
            error_handler: Arc::new(LogErrorHandler),
            env: Env::default(),
            throw_on_errors: false,
            state: Mutex::new(FetchState::Unfetched),
        }
    }

    /// Create a Service that talks to the flag server at `url` over HTTP.
    pub fn make(
        url: &str,
        auth_token: &str,
        traffic_type: TrafficType,
        traffic_key: impl Into<AttributeValue>,
        attributes: Attributes,
    ) -> Result<Self> {
        ServiceBuilder::new(url, auth_token, traffic_type, traffic_key)
            .attributes(attributes)
            .build()
    }

    /// Return lookup failures to the caller in addition to reporting them.
    pub fn throw_on_errors(mut self) -> Self {
        self.throw_on_errors = true;
        self
    }

    pub fn with_error_handler(mut self, error_handler: impl ErrorHandler + 'static) -> Self {
        self.error_handler = Arc::new(error_handler);
        self
    }

    /// Read overrides from `environment` instead of the process environment.
    pub fn with_environment(mut self, environment: impl Environment + 'static) -> Self {
        self.env = Env::new(environment);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn traffic_type(&self) -> TrafficType {
        self.traffic_type
    }

    pub fn traffic_key(&self) -> &AttributeValue {
        &self.traffic_key
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether the fetch has been attempted, successfully or not.
    pub fn is_fetched(&self) -> bool {
        !matches!(*self.lock_state(), FetchState::Unfetched)
    }

    /// Look up one flag. Keys the server did not return yield a placeholder flag.
    ///
    /// If the override variable for `key` is set, no request is made for this lookup.
    pub fn get_flag(&self, key: &str) -> Result<Flag> {
        if self.env.var(&override_name(key)).is_some() {
            debug!("Flag {} is overridden by {}", key, override_name(key));
            return Ok(self
                .snapshot()
                .and_then(|flags| flags.get(key).cloned())
                .unwrap_or_else(|| Flag::placeholder(key, self.env.clone())));
        }

        let flags = self.ensure_fetched()?;
        Ok(match flags.get(key) {
            Some(flag) => flag.clone(),
            None => {
                debug!("Flag {} was not returned by the server", key);
                Flag::placeholder(key, self.env.clone())
            }
        })
    }

    /// Look up several flags at once.
    ///
    /// With no keys, every fetched flag is returned. Otherwise the result holds exactly the
    /// requested keys, with placeholders for the ones the server did not return.
    pub fn get_flags<K: AsRef<str>>(&self, keys: &[K]) -> Result<FlagSet> {
        let flags = self.ensure_fetched()?;
        if keys.is_empty() {
            return Ok((*flags).clone());
        }

        let missing = keys
            .iter()
            .map(|key| key.as_ref())
            .filter(|key| !flags.contains_key(key))
            .join(", ");
        if !missing.is_empty() {
            debug!("Flags not returned by the server: {}", missing);
        }

        Ok(flags.only(keys, &self.env))
    }

    /// The `keys` and `attributes` query parameters sent to the flag server.
    pub(crate) fn query(&self) -> Result<Vec<(String, String)>> {
        let keys = serde_json::to_string(&[MatchingKey {
            matching_key: &self.traffic_key,
            traffic_type: self.traffic_type,
        }])?;
        let attributes = serde_json::to_string(&self.attributes)?;

        Ok(vec![
            ("keys".to_string(), keys),
            ("attributes".to_string(), attributes),
        ])
    }

    fn lock_state(&self) -> MutexGuard<'_, FetchState> {
        // Fetch panics are caught before they can poison the lock.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn snapshot(&self) -> Option<Arc<FlagSet>> {
        match &*self.lock_state() {
            FetchState::Fetched(flags) => Some(Arc::clone(flags)),
            _ => None,
        }
    }

    fn ensure_fetched(&self) -> Result<Arc<FlagSet>> {
        let mut state = self.lock_state();

        match &*state {
            FetchState::Fetched(flags) => return Ok(Arc::clone(flags)),
            FetchState::Failed => return Ok(Arc::default()),
            FetchState::Unfetched => {}
        }

        debug!(
            "Fetching flags for {} {:?}",
            self.traffic_type, self.traffic_key
        );

        // The lock stays held for the whole request so concurrent first lookups wait for this
        // fetch instead of starting their own.
        let fetched = panic::catch_unwind(AssertUnwindSafe(|| self.fetch()))
            .unwrap_or_else(|payload| Err(Error::internal(panic_message(payload.as_ref()))));

        match fetched {
            Ok(flags) => {
                debug!("Fetched {} flags", flags.len());
                let flags = Arc::new(flags);
                *state = FetchState::Fetched(Arc::clone(&flags));
                Ok(flags)
            }
            Err(error) => {
                *state = FetchState::Failed;
                drop(state);
                self.fail(error)
            }
        }
    }

    fn fail(&self, error: Error) -> Result<Arc<FlagSet>> {
        self.error_handler.handle(&error);
        if self.throw_on_errors {
            Err(error)
        } else {
            Ok(Arc::default())
        }
    }

    fn fetch(&self) -> Result<FlagSet> {
        let request = Request {
            path: ENDPOINT_PATH.to_string(),
            query: self.query()?,
            timeout: self.timeout,
        };

        let response = self.transport.get(&request)?;
        if !response.is_success() {
            return Err(TransportError::Status {
                status: response.status,
                body: response.body,
            }
            .into());
        }

        let mut sections: HashMap<String, Value> = serde_json::from_str(&response.body)?;
        let section = sections
            .remove(self.traffic_type.as_str())
            .ok_or_else(|| {
                Error::internal(format!(
                    "response has no section for traffic type {}",
                    self.traffic_type
                ))
            })?;
        let treatments: HashMap<String, TreatmentWithConfig> = serde_json::from_value(section)?;

        Ok(treatments
            .into_iter()
            .map(|(key, treatment)| {
                Flag::with_env(key, treatment.treatment, treatment.config, self.env.clone())
            })
            .collect())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown cause");
    format!("flag fetch panicked: {}", detail)
}

/// Contains methods for building a [Service] that fetches flags over HTTP.
///
/// If you do not change any values, the defaults are:
/// - no attributes
/// - a timeout of [DEFAULT_TIMEOUT]
/// - errors are written to the log and not returned
/// - overrides are read from the process environment
pub struct ServiceBuilder {
    base_url: String,
    auth_token: String,
    traffic_type: TrafficType,
    traffic_key: AttributeValue,
    attributes: Attributes,
    timeout: Duration,
    error_handler: Arc<dyn ErrorHandler>,
    env: Env,
    throw_on_errors: bool,
}

impl ServiceBuilder {
    pub fn new(
        base_url: impl Into<String>,
        auth_token: impl Into<String>,
        traffic_type: TrafficType,
        traffic_key: impl Into<AttributeValue>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            auth_token: auth_token.into(),
            traffic_type,
            traffic_key: traffic_key.into(),
            attributes: HashMap::new(),
            timeout: DEFAULT_TIMEOUT,
            error_handler: Arc::new(LogErrorHandler),
            env: Env::default(),
            throw_on_errors: false,
        }
    }

    /// Replace all attributes.
    pub fn attributes(&mut self, attributes: Attributes) -> &mut Self {
        self.attributes = attributes;
        self
    }

    /// Set a single attribute, replacing any previous value for `name`.
    pub fn attribute(
        &mut self,
        name: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> &mut Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = timeout;
        self
    }

    pub fn error_handler(&mut self, error_handler: impl ErrorHandler + 'static) -> &mut Self {
        self.error_handler = Arc::new(error_handler);
        self
    }

    pub fn environment(&mut self, environment: impl Environment + 'static) -> &mut Self {
        self.env = Env::new(environment);
        self
    }

    pub fn throw_on_errors(&mut self, throw_on_errors: bool) -> &mut Self {
        self.throw_on_errors = throw_on_errors;
        self
    }

    /// Build the Service. Fails only if the HTTP client cannot be created, for example because
    /// the auth token is not a valid header value.
    pub fn build(&self) -> Result<Service> {
        let transport = HttpTransport::new(self.base_url.as_str(), &self.auth_token)?;
        self.build_with_transport(transport)
    }

    /// Build the Service on top of a caller-provided transport. The base URL and auth token are
    /// not used.
    pub fn build_with_transport(&self, transport: impl Transport + 'static) -> Result<Service> {
        Ok(Service {
            transport: Box::new(transport),
            traffic_type: self.traffic_type,
            traffic_key: self.traffic_key.clone(),
            attributes: self.attributes.clone(),
            timeout: self.timeout,
            error_handler: Arc::clone(&self.error_handler),
            env: self.env.clone(),
            throw_on_errors: self.throw_on_errors,
            state: Mutex::new(FetchState::Unfetched),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::MapEnvironment;
    use crate::flag::FlagConfig;
    use crate::flag_value::FlagValue;
    use crate::test_common::{entity_treatments, network_failure, MockTransport, PanickingTransport};
    use crate::transport::Response;
    use assert_json_diff::assert_json_eq;
    use maplit::hashmap;
    use serde_json::json;
    use spectral::prelude::*;
    use std::error::Error as _;
    use test_case::test_case;

    fn service(transport: &Arc<MockTransport>) -> Service {
        Service::new(
            Arc::clone(transport),
            TrafficType::Entity,
            123,
            Attributes::new(),
        )
        .with_environment(MapEnvironment::new())
        .with_error_handler(|_: &Error| {})
    }

    fn query_json(request: &Request, name: &str) -> Value {
        let (_, value) = request
            .query
            .iter()
            .find(|(n, _)| n == name)
            .expect("query parameter present");
        serde_json::from_str(value).unwrap()
    }

    #[test]
    fn it_does_not_make_an_api_call_until_a_flag_is_requested() {
        let transport = Arc::new(MockTransport::new(vec![Ok(Response::new(200, ""))]));
        let service = service(&transport);

        assert_eq!(transport.request_count(), 0);
        assert!(!service.is_fetched());

        service.get_flags::<&str>(&[]).unwrap();

        assert_eq!(transport.request_count(), 1);
        assert!(service.is_fetched());
    }

    #[test]
    fn it_caches_fetched_flags() {
        let transport = Arc::new(MockTransport::new(vec![
            Ok(Response::new(200, entity_treatments())),
            Ok(Response::new(200, entity_treatments())),
        ]));
        let service = service(&transport);

        service.get_flags::<&str>(&[]).unwrap();
        service.get_flags::<&str>(&[]).unwrap();
        service.get_flag("test_flag1").unwrap();

        assert_eq!(transport.request_count(), 1);
    }

    #[test]
    fn it_sends_the_expected_request() {
        let transport = Arc::new(MockTransport::with_body(entity_treatments()));
        let service = Service::new(
            Arc::clone(&transport),
            TrafficType::Entity,
            123,
            hashmap! {"plan".to_string() => "pro".into(), "seats".to_string() => 4.into()},
        )
        .with_environment(MapEnvironment::new())
        .with_timeout(Duration::from_secs(2));

        service.get_flag("test_flag1").unwrap();

        let requests = transport.requests();
        assert_that!(requests).has_length(1);
        let request = &requests[0];
        assert_eq!(request.path, ENDPOINT_PATH);
        assert_eq!(request.timeout, Duration::from_secs(2));
        assert_json_eq!(
            query_json(request, "keys"),
            json!([{"matchingKey": 123, "trafficType": "entity"}])
        );
        assert_json_eq!(
            query_json(request, "attributes"),
            json!({"plan": "pro", "seats": 4})
        );
    }

    #[test]
    fn empty_attributes_encode_as_an_object() {
        let transport = Arc::new(MockTransport::with_body(entity_treatments()));
        let service = service(&transport);

        let query = service.query().unwrap();
        assert_that!(query).is_equal_to(vec![
            (
                "keys".to_string(),
                r#"[{"matchingKey":123,"trafficType":"entity"}]"#.to_string(),
            ),
            ("attributes".to_string(), "{}".to_string()),
        ]);
    }

    #[test]
    fn it_can_get_a_single_flag() {
        let transport = Arc::new(MockTransport::with_body(entity_treatments()));
        let service = service(&transport);

        let flag = service.get_flag("test_flag1").unwrap();
        assert_that!(flag.value()).contains_value(FlagValue::Bool(false));
        assert_that!(flag.config()).contains_value(FlagConfig::Raw("test config".into()));

        let flag = service.get_flag("banner").unwrap();
        assert_that!(flag.value()).contains_value(FlagValue::Treatment("variant-b".into()));
        assert_that!(flag.config()).contains_value(FlagConfig::Json(json!({"color": "red"})));
    }

    #[test_case("test_flag2")]
    #[test_case("bare")]
    fn null_or_missing_config_is_absent(key: &str) {
        let transport = Arc::new(MockTransport::with_body(entity_treatments()));
        let service = service(&transport);

        let flag = service.get_flag(key).unwrap();
        assert!(flag.is_on());
        assert_eq!(flag.raw_config(), "");
        assert_that!(flag.config()).is_none();
    }

    #[test]
    fn it_can_get_multiple_flags() {
        let transport = Arc::new(MockTransport::with_body(entity_treatments()));
        let service = service(&transport);

        let flags = service.get_flags(&["test_flag1", "test_flag2"]).unwrap();

        assert_that!(flags.len()).is_equal_to(2);
        assert_that!(flags["test_flag1"].value()).contains_value(FlagValue::Bool(false));
        assert_that!(flags["test_flag1"].config())
            .contains_value(FlagConfig::Raw("test config".into()));
        assert_that!(flags["test_flag2"].value()).contains_value(FlagValue::Bool(true));
        assert!(!flags.contains_key("another_flag"));
    }

    #[test]
    fn no_keys_returns_every_flag() {
        let transport = Arc::new(MockTransport::with_body(entity_treatments()));
        let service = service(&transport);

        let flags = service.get_flags::<String>(&[]).unwrap();

        let mut keys: Vec<&str> = flags.keys().collect();
        keys.sort();
        assert_that!(keys).is_equal_to(vec![
            "another_flag",
            "banner",
            "bare",
            "test_flag1",
            "test_flag2",
        ]);
    }

    #[test]
    fn getting_unknown_flags_returns_placeholders() {
        let transport = Arc::new(MockTransport::with_body(entity_treatments()));
        let service = service(&transport);

        let flag = service.get_flag("known-bad-flag").unwrap();
        assert_eq!(flag.key(), "known-bad-flag");
        assert_that!(flag.value()).is_none();
        assert_that!(flag.config()).is_none();

        let flags = service
            .get_flags(&["test_flag1", "known-bad-flag-1", "known-bad-flag-2"])
            .unwrap();
        assert_that!(flags.len()).is_equal_to(3);
        for key in ["known-bad-flag-1", "known-bad-flag-2"] {
            assert_eq!(flags[key].key(), key);
            assert_that!(flags[key].value()).is_none();
            assert_that!(flags[key].config()).is_none();
        }
        assert_eq!(transport.request_count(), 1);
    }

    #[test]
    fn override_bypasses_the_fetch() {
        let transport = Arc::new(MockTransport::with_body(entity_treatments()));
        let mut env = MapEnvironment::new();
        env.set("FEATURE_FLAG_test_flag1", "on");
        let service = service(&transport).with_environment(env);

        let flag = service.get_flag("test_flag1").unwrap();

        assert_that!(flag.value()).contains_value(FlagValue::Bool(true));
        assert_eq!(transport.request_count(), 0);
        assert!(!service.is_fetched());
    }

    #[test]
    fn override_keeps_fetched_config() {
        let transport = Arc::new(MockTransport::with_body(entity_treatments()));
        let mut env = MapEnvironment::new();
        env.set("FEATURE_FLAG_banner", "OFF");
        let service = service(&transport).with_environment(env);

        let flags = service.get_flags(&["banner"]).unwrap();
        assert_that!(flags["banner"].value()).contains_value(FlagValue::Bool(false));

        let flag = service.get_flag("banner").unwrap();
        assert_that!(flag.value()).contains_value(FlagValue::Bool(false));
        assert_that!(flag.config()).contains_value(FlagConfig::Json(json!({"color": "red"})));
        assert_eq!(transport.request_count(), 1);
    }

    #[test]
    fn network_errors_are_swallowed_by_default() {
        let transport = Arc::new(MockTransport::new(vec![network_failure()]));
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reported);
        let service = service(&transport)
            .with_error_handler(move |e: &Error| sink.lock().unwrap().push(e.category()));

        let flag = service.get_flag("test-flag").unwrap();

        assert_that!(flag.value()).is_none();
        assert_that!(*reported.lock().unwrap()).is_equal_to(vec!["network error"]);
    }

    #[test]
    fn it_can_throw_on_errors() {
        let transport = Arc::new(MockTransport::new(vec![network_failure()]));
        let reported = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&reported);
        let service = service(&transport)
            .with_error_handler(move |_: &Error| *sink.lock().unwrap() += 1)
            .throw_on_errors();

        let error = service.get_flag("test-flag").unwrap_err();

        assert!(matches!(error, Error::Network(TransportError::Connect(_))));
        assert_eq!(error.to_string(), "network error");
        assert_that!(error.source().map(|s| s.to_string()))
            .contains_value("could not connect to flag server".to_string());
        assert_eq!(*reported.lock().unwrap(), 1);
    }

    #[test]
    fn failed_fetches_are_not_retried() {
        let transport = Arc::new(MockTransport::new(vec![
            network_failure(),
            Ok(Response::new(200, entity_treatments())),
        ]));
        let service = service(&transport).throw_on_errors();

        assert!(service.get_flag("test_flag1").is_err());

        let flag = service.get_flag("test_flag1").unwrap();
        assert_that!(flag.value()).is_none();
        assert_that!(service.get_flags::<&str>(&[]).unwrap().is_empty()).is_true();
        assert_eq!(transport.request_count(), 1);
    }

    #[test_case(Ok(Response::new(200, "")), "could not parse flag data"; "empty body")]
    #[test_case(Ok(Response::new(200, "<html>")), "could not parse flag data"; "not json")]
    #[test_case(Ok(Response::new(200, r#"{"entity": {"f": {"treatment": 5}}}"#)), "could not parse flag data"; "wrong shape")]
    #[test_case(Ok(Response::new(500, "oops")), "network error"; "server error")]
    #[test_case(Err(TransportError::Timeout(DEFAULT_TIMEOUT)), "network error"; "timeout")]
    #[test_case(Ok(Response::new(200, r#"{"user": {}}"#)), "internal error"; "missing section")]
    fn failures_are_reported_and_returned(
        response: std::result::Result<Response, TransportError>,
        category: &str,
    ) {
        let transport = Arc::new(MockTransport::new(vec![response]));
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reported);
        let service = service(&transport)
            .with_error_handler(move |e: &Error| sink.lock().unwrap().push(e.category()))
            .throw_on_errors();

        let error = service.get_flag("f").unwrap_err();

        assert_eq!(error.category(), category);
        assert_eq!(*reported.lock().unwrap(), vec![category]);
    }

    #[test]
    fn other_traffic_types_read_their_own_section() {
        let transport = Arc::new(MockTransport::with_body(
            json!({
                "entity": {"f": {"treatment": "off"}},
                "user": {"f": {"treatment": "on"}}
            })
            .to_string(),
        ));
        let service = Service::new(
            Arc::clone(&transport),
            TrafficType::User,
            "user-42",
            Attributes::new(),
        )
        .with_environment(MapEnvironment::new());

        assert!(service.get_flag("f").unwrap().is_on());
        assert_json_eq!(
            query_json(&transport.requests()[0], "keys"),
            json!([{"matchingKey": "user-42", "trafficType": "user"}])
        );
    }

    #[test]
    fn concurrent_first_lookups_share_one_fetch() {
        let transport = Arc::new(
            MockTransport::new(vec![
                Ok(Response::new(200, entity_treatments())),
                Ok(Response::new(200, entity_treatments())),
            ])
            .delayed(Duration::from_millis(50)),
        );
        let service = service(&transport);

        let results: Vec<FlagSet> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| service.get_flags::<&str>(&[]).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(transport.request_count(), 1);
        assert_eq!(results[0].len(), 5);
        assert!(results.iter().all(|flags| flags == &results[0]));
    }

    #[test]
    fn instances_do_not_share_state() {
        let first = Arc::new(MockTransport::new(vec![network_failure()]));
        let second = Arc::new(MockTransport::with_body(entity_treatments()));

        assert_that!(service(&first).get_flag("test_flag2").unwrap().value()).is_none();
        assert!(service(&second).get_flag("test_flag2").unwrap().is_on());
        assert_eq!(first.request_count(), 1);
        assert_eq!(second.request_count(), 1);
    }

    #[test_case(false; "errors swallowed")]
    #[test_case(true; "errors thrown")]
    fn a_panicking_fetch_is_reported_once_and_not_retried(throw: bool) {
        let transport = Arc::new(PanickingTransport::default());
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reported);
        let service = ServiceBuilder::new("http://unused", "token", TrafficType::Entity, 1)
            .environment(MapEnvironment::new())
            .error_handler(move |e: &Error| {
                sink.lock()
                    .unwrap()
                    .push(e.source().map(|s| s.to_string()))
            })
            .throw_on_errors(throw)
            .build_with_transport(Arc::clone(&transport))
            .unwrap();

        let first = service.get_flag("f");
        if throw {
            assert_eq!(first.unwrap_err().category(), "internal error");
        } else {
            let placeholder = first.unwrap();
            assert_eq!(placeholder.key(), "f");
            assert_that!(placeholder.value()).is_none();
        }

        assert_that!(service.get_flag("f").unwrap().value()).is_none();
        assert_that!(service.get_flags(&["f", "g"]).unwrap().len()).is_equal_to(2);
        assert_eq!(transport.calls(), 1);
        assert_eq!(
            *reported.lock().unwrap(),
            vec![Some("flag fetch panicked: transport exploded".to_string())]
        );
    }

    #[test]
    fn non_finite_attributes_fail_before_any_request() {
        let transport = Arc::new(MockTransport::with_body(entity_treatments()));
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reported);
        let service = Service::new(
            Arc::clone(&transport),
            TrafficType::Entity,
            123,
            hashmap! {"score".to_string() => AttributeValue::Number(f64::NAN)},
        )
        .with_environment(MapEnvironment::new())
        .with_error_handler(move |e: &Error| sink.lock().unwrap().push(e.category()))
        .throw_on_errors();

        assert!(matches!(service.query(), Err(Error::Parse(_))));

        let error = service.get_flag("test_flag1").unwrap_err();
        assert!(matches!(error, Error::Parse(_)));
        assert_eq!(*reported.lock().unwrap(), vec!["could not parse flag data"]);
        assert_eq!(transport.request_count(), 0);

        assert_that!(service.get_flag("test_flag1").unwrap().value()).is_none();
    }

    #[test]
    fn a_non_finite_traffic_key_degrades_to_placeholders() {
        let transport = Arc::new(MockTransport::with_body(entity_treatments()));
        let service = Service::new(
            Arc::clone(&transport),
            TrafficType::Entity,
            f64::INFINITY,
            Attributes::new(),
        )
        .with_environment(MapEnvironment::new())
        .with_error_handler(|_: &Error| {});

        let flags = service.get_flags(&["test_flag2"]).unwrap();

        assert_that!(flags["test_flag2"].value()).is_none();
        assert_eq!(transport.request_count(), 0);
    }

    #[test]
    fn builder_defaults_and_overrides() {
        let transport = Arc::new(MockTransport::with_body(entity_treatments()));
        let mut env = MapEnvironment::new();
        env.set("FEATURE_FLAG_another_flag", "On");

        let service = ServiceBuilder::new("http://unused", "token", TrafficType::Entity, 7)
            .attribute("region", "eu")
            .attribute("beta", true)
            .timeout(Duration::from_millis(250))
            .environment(env)
            .error_handler(|_: &Error| {})
            .throw_on_errors(true)
            .build_with_transport(Arc::clone(&transport))
            .unwrap();

        assert_eq!(service.timeout(), Duration::from_millis(250));
        assert_eq!(service.traffic_type(), TrafficType::Entity);
        assert_eq!(service.traffic_key(), &AttributeValue::Int(7));
        assert_eq!(service.attributes().len(), 2);

        let flags = service.get_flags(&["another_flag"]).unwrap();
        assert!(flags["another_flag"].is_on());
    }

    #[test]
    fn it_can_be_created_statically() {
        let attributes = hashmap! {"test".to_string() => AttributeValue::from("data")};
        let service = Service::make(
            "http://url.com",
            "authtoken",
            TrafficType::Entity,
            123,
            attributes.clone(),
        )
        .unwrap();

        assert_eq!(service.traffic_type(), TrafficType::Entity);
        assert_eq!(service.traffic_key(), &AttributeValue::Int(123));
        assert_eq!(service.attributes(), &attributes);
        assert_eq!(service.timeout(), DEFAULT_TIMEOUT);
        assert!(!service.is_fetched());
    }

    #[test]
    fn invalid_tokens_fail_to_build() {
        let result = ServiceBuilder::new("http://url.com", "bad\ntoken", TrafficType::Entity, 1)
            .build();
        assert!(matches!(result, Err(Error::Network(TransportError::Other(_)))));
    }

    // Runs against a real flag server when ff_url, ff_auth_token and ff_entity_id are set.
    #[test]
    fn it_can_fetch_all_flags_from_a_live_server() {
        let (Ok(url), Ok(token), Ok(entity)) = (
            std::env::var("ff_url"),
            std::env::var("ff_auth_token"),
            std::env::var("ff_entity_id"),
        ) else {
            return;
        };

        let service = Service::make(&url, &token, TrafficType::Entity, entity, Attributes::new())
            .unwrap()
            .with_timeout(Duration::from_secs(5))
            .throw_on_errors();

        let flags = service.get_flags::<&str>(&[]).unwrap();
        assert_that!(flags.len()).is_greater_than(0);
    }
}

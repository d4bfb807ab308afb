//! CloudFront cache policies, origins and distributions.
//!
//! ## Cache Policy Defaults
//!
//! | Setting | Default |
//! |---------|---------|
//! | `min_ttl` | 0 |
//! | `default_ttl` | max(1 day, `min_ttl`) |
//! | `max_ttl` | max(365 days, `default_ttl`) |
//! | cookies, headers, query strings | none |
//! | gzip / brotli | off |
//!
//! TTLs must satisfy `min_ttl <= default_ttl <= max_ttl`.
//!
//! ## Origins
//!
//! [`HttpOrigin`] takes the domain as a [`Value`], so it can be derived from
//! another resource at deploy time (for example the host part of an API URL
//! via `Fn::Select`/`Fn::Split`).

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::construct::logical_id::make_unique_id;
use crate::construct::{ResourceRef, Stack, Value};
use crate::error::{Error, Result};
use crate::props;

/// Managed `CachingOptimized` policy, used when a behavior names none.
const CACHING_OPTIMIZED_POLICY_ID: &str = "658327ea-f89d-4fab-a63d-7e88639e58f6";

const ONE_DAY: Duration = Duration::from_secs(86_400);
const ONE_YEAR: Duration = Duration::from_secs(365 * 86_400);

static CACHE_POLICY_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\w-]{1,128}$").expect("static regex"));

/// Cookies in the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CacheCookieBehavior {
    #[default]
    None,
    All,
    AllowList(Vec<String>),
    DenyList(Vec<String>),
}

/// Headers in the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CacheHeaderBehavior {
    #[default]
    None,
    AllowList(Vec<String>),
}

/// Query strings in the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CacheQueryStringBehavior {
    #[default]
    None,
    All,
    AllowList(Vec<String>),
    DenyList(Vec<String>),
}

fn behavior_value(key: &str, behavior: &str, items_key: &str, items: &[String]) -> Value {
    let mut value = Value::Null;
    value.insert(key, behavior);
    if !items.is_empty() {
        value.insert(items_key, items.to_vec());
    }
    value
}

impl CacheCookieBehavior {
    fn to_value(&self) -> Value {
        let (behavior, items): (&str, &[String]) = match self {
            CacheCookieBehavior::None => ("none", &[]),
            CacheCookieBehavior::All => ("all", &[]),
            CacheCookieBehavior::AllowList(c) => ("whitelist", c),
            CacheCookieBehavior::DenyList(c) => ("allExcept", c),
        };
        behavior_value("CookieBehavior", behavior, "Cookies", items)
    }
}

impl CacheHeaderBehavior {
    fn to_value(&self) -> Value {
        let (behavior, items): (&str, &[String]) = match self {
            CacheHeaderBehavior::None => ("none", &[]),
            CacheHeaderBehavior::AllowList(h) => ("whitelist", h),
        };
        behavior_value("HeaderBehavior", behavior, "Headers", items)
    }
}

impl CacheQueryStringBehavior {
    fn to_value(&self) -> Value {
        let (behavior, items): (&str, &[String]) = match self {
            CacheQueryStringBehavior::None => ("none", &[]),
            CacheQueryStringBehavior::All => ("all", &[]),
            CacheQueryStringBehavior::AllowList(q) => ("whitelist", q),
            CacheQueryStringBehavior::DenyList(q) => ("allExcept", q),
        };
        behavior_value("QueryStringBehavior", behavior, "QueryStrings", items)
    }
}

/// Options for [`CachePolicy::new`].
#[derive(Debug, Clone, Default)]
pub struct CachePolicyProps {
    /// Policy name; generated from the construct path and region when unset
    pub cache_policy_name: Option<String>,
    pub comment: Option<String>,
    pub cookie_behavior: CacheCookieBehavior,
    pub header_behavior: CacheHeaderBehavior,
    pub query_string_behavior: CacheQueryStringBehavior,
    pub enable_accept_encoding_gzip: bool,
    pub enable_accept_encoding_brotli: bool,
    pub min_ttl: Option<Duration>,
    pub default_ttl: Option<Duration>,
    pub max_ttl: Option<Duration>,
}

/// Handle to a declared cache policy.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    resource: ResourceRef,
    min_ttl: Duration,
    default_ttl: Duration,
    max_ttl: Duration,
}

impl CachePolicy {
    /// Declare a cache policy.
    pub fn new(stack: &mut Stack, id: &str, props: CachePolicyProps) -> Result<Self> {
        let min_ttl = props.min_ttl.unwrap_or_default();
        let default_ttl = props.default_ttl.unwrap_or(ONE_DAY.max(min_ttl));
        let max_ttl = props.max_ttl.unwrap_or(ONE_YEAR.max(default_ttl));
        if !(min_ttl <= default_ttl && default_ttl <= max_ttl) {
            return Err(Error::validation(
                id,
                format!(
                    "TTLs must satisfy min <= default <= max, got {}s / {}s / {}s",
                    min_ttl.as_secs(),
                    default_ttl.as_secs(),
                    max_ttl.as_secs()
                ),
            ));
        }

        let name = match props.cache_policy_name {
            Some(name) if CACHE_POLICY_NAME_RE.is_match(&name) => Value::from(name),
            Some(name) => {
                return Err(Error::validation(
                    id,
                    format!(
                        "cache policy name '{}' must be 1-128 letters, digits, hyphens or underscores",
                        name
                    ),
                ))
            }
            None => {
                let unique = make_unique_id(&[stack.id(), id])?;
                Value::join("", vec![unique.into(), "-".into(), Value::region()])
            }
        };

        let resource = stack.add_resource(
            &format!("{}/Resource", id),
            "AWS::CloudFront::CachePolicy",
            props!({
                "CachePolicyConfig": props!({
                    "Comment": props.comment,
                    "DefaultTTL": default_ttl.as_secs(),
                    "MaxTTL": max_ttl.as_secs(),
                    "MinTTL": min_ttl.as_secs(),
                    "Name": name,
                    "ParametersInCacheKeyAndForwardedToOrigin": props!({
                        "CookiesConfig": props.cookie_behavior.to_value(),
                        "EnableAcceptEncodingBrotli": props.enable_accept_encoding_brotli,
                        "EnableAcceptEncodingGzip": props.enable_accept_encoding_gzip,
                        "HeadersConfig": props.header_behavior.to_value(),
                        "QueryStringsConfig": props.query_string_behavior.to_value(),
                    }),
                }),
            }),
        )?;

        Ok(Self {
            resource,
            min_ttl,
            default_ttl,
            max_ttl,
        })
    }

    /// The policy id (`Ref`).
    pub fn cache_policy_id(&self) -> Value {
        self.resource.reference()
    }

    /// The declared resource.
    pub fn resource(&self) -> &ResourceRef {
        &self.resource
    }

    pub fn min_ttl(&self) -> Duration {
        self.min_ttl
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn max_ttl(&self) -> Duration {
        self.max_ttl
    }
}

/// Protocol CloudFront uses towards the origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OriginProtocolPolicy {
    HttpOnly,
    MatchViewer,
    #[default]
    HttpsOnly,
}

impl OriginProtocolPolicy {
    fn as_str(&self) -> &'static str {
        match self {
            OriginProtocolPolicy::HttpOnly => "http-only",
            OriginProtocolPolicy::MatchViewer => "match-viewer",
            OriginProtocolPolicy::HttpsOnly => "https-only",
        }
    }
}

/// Options for [`HttpOrigin::new`].
#[derive(Debug, Clone)]
pub struct HttpOriginProps {
    pub protocol_policy: OriginProtocolPolicy,
    /// Wait for a response, 1-180 seconds
    pub read_timeout: Duration,
    /// Keep idle origin connections, 1-180 seconds
    pub keepalive_timeout: Duration,
    /// Path prefix for origin requests; `/` means none
    pub origin_path: Option<String>,
}

impl Default for HttpOriginProps {
    fn default() -> Self {
        Self {
            protocol_policy: OriginProtocolPolicy::HttpsOnly,
            read_timeout: Duration::from_secs(30),
            keepalive_timeout: Duration::from_secs(5),
            origin_path: None,
        }
    }
}

/// An origin reachable over HTTP(S) by domain name.
#[derive(Debug, Clone)]
pub struct HttpOrigin {
    domain_name: Value,
    protocol_policy: OriginProtocolPolicy,
    read_timeout: u64,
    keepalive_timeout: u64,
    origin_path: Option<String>,
}

impl HttpOrigin {
    /// An origin at `domain_name`.
    pub fn new(domain_name: Value, props: HttpOriginProps) -> Result<Self> {
        let read_timeout = check_timeout("readTimeout", props.read_timeout)?;
        let keepalive_timeout = check_timeout("keepaliveTimeout", props.keepalive_timeout)?;
        Ok(Self {
            domain_name,
            protocol_policy: props.protocol_policy,
            read_timeout,
            keepalive_timeout,
            origin_path: props.origin_path.as_deref().and_then(normalize_origin_path),
        })
    }

    /// Origin path after normalization.
    pub fn origin_path(&self) -> Option<&str> {
        self.origin_path.as_deref()
    }

    fn to_value(&self, origin_id: &str) -> Value {
        props!({
            "CustomOriginConfig": props!({
                "OriginKeepaliveTimeout": self.keepalive_timeout,
                "OriginProtocolPolicy": self.protocol_policy.as_str(),
                "OriginReadTimeout": self.read_timeout,
                "OriginSSLProtocols": vec!["TLSv1.2"],
            }),
            "DomainName": self.domain_name.clone(),
            "Id": origin_id,
            "OriginPath": self.origin_path.clone(),
        })
    }
}

fn check_timeout(name: &str, timeout: Duration) -> Result<u64> {
    let secs = timeout.as_secs();
    if timeout.subsec_nanos() != 0 || !(1..=180).contains(&secs) {
        return Err(Error::validation(
            "HttpOrigin",
            format!("{} must be a whole number of seconds between 1 and 180", name),
        ));
    }
    Ok(secs)
}

/// Leading slash added, trailing slash dropped; `/` and empty become none.
fn normalize_origin_path(path: &str) -> Option<String> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with('/') {
        Some(trimmed.to_string())
    } else {
        Some(format!("/{}", trimmed))
    }
}

/// Methods CloudFront forwards to the origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AllowedMethods {
    #[default]
    GetHead,
    GetHeadOptions,
    All,
}

impl AllowedMethods {
    fn methods(&self) -> &'static [&'static str] {
        match self {
            AllowedMethods::GetHead => &["GET", "HEAD"],
            AllowedMethods::GetHeadOptions => &["GET", "HEAD", "OPTIONS"],
            AllowedMethods::All => &["GET", "HEAD", "OPTIONS", "PUT", "PATCH", "POST", "DELETE"],
        }
    }
}

/// Methods whose responses are cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CachedMethods {
    #[default]
    GetHead,
    GetHeadOptions,
}

impl CachedMethods {
    fn methods(&self) -> &'static [&'static str] {
        match self {
            CachedMethods::GetHead => &["GET", "HEAD"],
            CachedMethods::GetHeadOptions => &["GET", "HEAD", "OPTIONS"],
        }
    }
}

/// What viewers may use to reach the distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ViewerProtocolPolicy {
    #[default]
    AllowAll,
    HttpsOnly,
    RedirectToHttps,
}

impl ViewerProtocolPolicy {
    fn as_str(&self) -> &'static str {
        match self {
            ViewerProtocolPolicy::AllowAll => "allow-all",
            ViewerProtocolPolicy::HttpsOnly => "https-only",
            ViewerProtocolPolicy::RedirectToHttps => "redirect-to-https",
        }
    }
}

/// Edge locations a distribution is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PriceClass {
    /// North America and Europe
    PriceClass100,
    /// Adds Asia, Middle East and Africa
    PriceClass200,
    #[default]
    PriceClassAll,
}

impl PriceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceClass::PriceClass100 => "PriceClass_100",
            PriceClass::PriceClass200 => "PriceClass_200",
            PriceClass::PriceClassAll => "PriceClass_All",
        }
    }
}

/// The default cache behavior of a distribution.
#[derive(Debug, Clone)]
pub struct BehaviorOptions {
    pub origin: HttpOrigin,
    pub allowed_methods: AllowedMethods,
    pub cached_methods: CachedMethods,
    pub viewer_protocol_policy: ViewerProtocolPolicy,
    pub compress: bool,
    /// Policy id; the managed `CachingOptimized` policy when unset
    pub cache_policy_id: Option<Value>,
}

impl BehaviorOptions {
    /// Defaults for `origin`.
    pub fn new(origin: HttpOrigin) -> Self {
        Self {
            origin,
            allowed_methods: AllowedMethods::default(),
            cached_methods: CachedMethods::default(),
            viewer_protocol_policy: ViewerProtocolPolicy::default(),
            compress: true,
            cache_policy_id: None,
        }
    }
}

/// Options for [`Distribution::new`].
#[derive(Debug, Clone)]
pub struct DistributionProps {
    pub default_behavior: BehaviorOptions,
    pub price_class: PriceClass,
    pub enable_ipv6: bool,
    pub comment: Option<String>,
}

impl DistributionProps {
    pub fn new(default_behavior: BehaviorOptions) -> Self {
        Self {
            default_behavior,
            price_class: PriceClass::default(),
            enable_ipv6: true,
            comment: None,
        }
    }
}

/// Handle to a declared distribution.
#[derive(Debug, Clone)]
pub struct Distribution {
    resource: ResourceRef,
    origin_id: String,
}

impl Distribution {
    /// Declare a distribution with a single origin.
    pub fn new(stack: &mut Stack, id: &str, props: DistributionProps) -> Result<Self> {
        let behavior = &props.default_behavior;
        let allowed = behavior.allowed_methods.methods();
        if let Some(missing) = behavior
            .cached_methods
            .methods()
            .iter()
            .find(|m| !allowed.contains(*m))
        {
            return Err(Error::validation(
                id,
                format!("cached method {} is not an allowed method", missing),
            ));
        }
        if let Some(comment) = &props.comment {
            if comment.len() > 128 {
                return Err(Error::validation(id, "comment exceeds 128 characters"));
            }
        }

        let origin_id = make_unique_id(&[stack.id(), id, "Origin1"])?;
        let cache_policy_id = behavior
            .cache_policy_id
            .clone()
            .unwrap_or_else(|| Value::from(CACHING_OPTIMIZED_POLICY_ID));

        let resource = stack.add_resource(
            &format!("{}/Resource", id),
            "AWS::CloudFront::Distribution",
            props!({
                "DistributionConfig": props!({
                    "Comment": props.comment.clone(),
                    "DefaultCacheBehavior": props!({
                        "AllowedMethods": allowed.to_vec(),
                        "CachePolicyId": cache_policy_id,
                        "CachedMethods": behavior.cached_methods.methods().to_vec(),
                        "Compress": behavior.compress,
                        "TargetOriginId": origin_id.as_str(),
                        "ViewerProtocolPolicy": behavior.viewer_protocol_policy.as_str(),
                    }),
                    "Enabled": true,
                    "HttpVersion": "http2",
                    "IPV6Enabled": props.enable_ipv6,
                    "Origins": vec![behavior.origin.to_value(&origin_id)],
                    "PriceClass": props.price_class.as_str(),
                }),
            }),
        )?;

        debug!(
            distribution = id,
            price_class = props.price_class.as_str(),
            "declared distribution"
        );
        Ok(Self {
            resource,
            origin_id,
        })
    }

    /// The `*.cloudfront.net` domain name.
    pub fn domain_name(&self) -> Value {
        self.resource.attr("DomainName")
    }

    /// The distribution id (`Ref`).
    pub fn distribution_id(&self) -> Value {
        self.resource.reference()
    }

    /// Id of the single origin.
    pub fn origin_id(&self) -> &str {
        &self.origin_id
    }

    /// The declared resource.
    pub fn resource(&self) -> &ResourceRef {
        &self.resource
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::construct::{LocalResolver, StackProps};

    fn rendered(stack: &Stack, r: &ResourceRef) -> serde_json::Value {
        stack
            .resource(&r.logical_id)
            .unwrap()
            .properties
            .resolve(&mut LocalResolver)
            .unwrap()
    }

    fn zero_ttl_props() -> CachePolicyProps {
        CachePolicyProps {
            query_string_behavior: CacheQueryStringBehavior::All,
            enable_accept_encoding_gzip: true,
            enable_accept_encoding_brotli: true,
            min_ttl: Some(Duration::ZERO),
            default_ttl: Some(Duration::ZERO),
            ..CachePolicyProps::default()
        }
    }

    #[test]
    fn test_cache_policy_config() {
        let mut stack = Stack::new("NextJS", StackProps::default()).unwrap();
        let policy = CachePolicy::new(&mut stack, "CachePolicy", zero_ttl_props()).unwrap();
        assert_eq!(policy.resource().logical_id, "CachePolicy26D8A535");
        assert_eq!(policy.max_ttl(), ONE_YEAR);

        let json = rendered(&stack, policy.resource());
        let config = &json["CachePolicyConfig"];
        assert_eq!(config["MinTTL"], 0);
        assert_eq!(config["DefaultTTL"], 0);
        assert_eq!(config["MaxTTL"], 31_536_000);

        let params = &config["ParametersInCacheKeyAndForwardedToOrigin"];
        assert_eq!(params["CookiesConfig"], serde_json::json!({ "CookieBehavior": "none" }));
        assert_eq!(params["HeadersConfig"], serde_json::json!({ "HeaderBehavior": "none" }));
        assert_eq!(
            params["QueryStringsConfig"],
            serde_json::json!({ "QueryStringBehavior": "all" })
        );
        assert_eq!(params["EnableAcceptEncodingGzip"], true);
        assert_eq!(params["EnableAcceptEncodingBrotli"], true);

        let name = config["Name"]["Fn::Join"][1].as_array().unwrap();
        assert!(name[0].as_str().unwrap().starts_with("NextJSCachePolicy"));
    }

    #[test]
    fn test_cache_policy_ttl_defaults_and_order() {
        let mut stack = Stack::new("NextJS", StackProps::default()).unwrap();
        let policy = CachePolicy::new(&mut stack, "Defaults", CachePolicyProps::default()).unwrap();
        assert_eq!(policy.default_ttl(), ONE_DAY);

        let inverted = CachePolicyProps {
            min_ttl: Some(Duration::from_secs(100)),
            default_ttl: Some(Duration::from_secs(10)),
            ..CachePolicyProps::default()
        };
        assert!(CachePolicy::new(&mut stack, "Bad", inverted).is_err());

        let bad_name = CachePolicyProps {
            cache_policy_name: Some("has space".into()),
            ..CachePolicyProps::default()
        };
        assert!(CachePolicy::new(&mut stack, "BadName", bad_name).is_err());
    }

    #[test]
    fn test_allow_list_behaviors() {
        let cookies = CacheCookieBehavior::AllowList(vec!["session".into()]).to_value();
        let json = cookies.resolve(&mut LocalResolver).unwrap();
        assert_eq!(json["CookieBehavior"], "whitelist");
        assert_eq!(json["Cookies"][0], "session");
    }

    #[test]
    fn test_origin_validation() {
        let origin = HttpOrigin::new(
            "example.com".into(),
            HttpOriginProps {
                read_timeout: Duration::from_secs(60),
                keepalive_timeout: Duration::from_secs(60),
                origin_path: Some("/".into()),
                ..HttpOriginProps::default()
            },
        )
        .unwrap();
        assert_eq!(origin.origin_path(), None);

        let too_long = HttpOriginProps {
            read_timeout: Duration::from_secs(181),
            ..HttpOriginProps::default()
        };
        assert!(HttpOrigin::new("example.com".into(), too_long).is_err());
        let zero = HttpOriginProps {
            keepalive_timeout: Duration::ZERO,
            ..HttpOriginProps::default()
        };
        assert!(HttpOrigin::new("example.com".into(), zero).is_err());
    }

    #[test]
    fn test_normalize_origin_path() {
        assert_eq!(normalize_origin_path("/"), None);
        assert_eq!(normalize_origin_path(""), None);
        assert_eq!(normalize_origin_path("static/"), Some("/static".to_string()));
        assert_eq!(normalize_origin_path("/a/b"), Some("/a/b".to_string()));
    }

    #[test]
    fn test_distribution() {
        let mut stack = Stack::new("NextJS", StackProps::default()).unwrap();
        let policy = CachePolicy::new(&mut stack, "CachePolicy", zero_ttl_props()).unwrap();
        let domain = Value::select(2, Value::split("/", "https://abc.example.com/".into()));
        let origin = HttpOrigin::new(
            domain,
            HttpOriginProps {
                read_timeout: Duration::from_secs(60),
                keepalive_timeout: Duration::from_secs(60),
                origin_path: Some("/".into()),
                ..HttpOriginProps::default()
            },
        )
        .unwrap();
        let behavior = BehaviorOptions {
            allowed_methods: AllowedMethods::All,
            cached_methods: CachedMethods::GetHead,
            viewer_protocol_policy: ViewerProtocolPolicy::RedirectToHttps,
            cache_policy_id: Some(policy.cache_policy_id()),
            ..BehaviorOptions::new(origin)
        };
        let distribution = Distribution::new(
            &mut stack,
            "CDN",
            DistributionProps {
                price_class: PriceClass::PriceClass100,
                ..DistributionProps::new(behavior)
            },
        )
        .unwrap();
        assert_eq!(distribution.resource().logical_id, "CDN2330F4C0");

        let json = rendered(&stack, distribution.resource());
        let config = &json["DistributionConfig"];
        assert_eq!(config["PriceClass"], "PriceClass_100");
        assert_eq!(config["HttpVersion"], "http2");
        assert_eq!(config["IPV6Enabled"], true);

        let behavior = &config["DefaultCacheBehavior"];
        assert_eq!(behavior["AllowedMethods"].as_array().unwrap().len(), 7);
        assert_eq!(behavior["CachedMethods"], serde_json::json!(["GET", "HEAD"]));
        assert_eq!(behavior["ViewerProtocolPolicy"], "redirect-to-https");
        assert_eq!(behavior["Compress"], true);
        assert_eq!(behavior["TargetOriginId"], distribution.origin_id());
        assert_eq!(
            behavior["CachePolicyId"],
            serde_json::json!({ "Ref": "CachePolicy26D8A535" })
        );

        let origin = &config["Origins"][0];
        assert_eq!(origin["CustomOriginConfig"]["OriginProtocolPolicy"], "https-only");
        assert_eq!(origin["CustomOriginConfig"]["OriginReadTimeout"], 60);
        assert!(origin.get("OriginPath").is_none());
        assert_eq!(origin["DomainName"]["Fn::Select"][0], 2);
    }

    #[test]
    fn test_cached_methods_must_be_allowed() {
        let mut stack = Stack::new("NextJS", StackProps::default()).unwrap();
        let origin = HttpOrigin::new("example.com".into(), HttpOriginProps::default()).unwrap();
        let behavior = BehaviorOptions {
            allowed_methods: AllowedMethods::GetHead,
            cached_methods: CachedMethods::GetHeadOptions,
            ..BehaviorOptions::new(origin)
        };
        assert!(Distribution::new(&mut stack, "CDN", DistributionProps::new(behavior)).is_err());
    }
}

use reqwest::header::HeaderValue;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Number, Value};
use url::Url;

use crate::core::{Mutation, MutationStrategy, MutationType};
use crate::http::HttpRequest;

/// Points in a request where the catalog can apply a mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum InjectionPoint {
    /// A payload field, addressed by its key path from the root object.
    JsonField(Vec<String>),
    /// A payload object that can receive an extra key. Empty path is the root.
    JsonObject(Vec<String>),
    /// A URL query parameter name.
    UrlParam(String),
    /// A request header name.
    Header(String),
}

impl InjectionPoint {
    /// Label recorded as the mutation's altered field.
    pub fn field_label(&self) -> Option<String> {
        match self {
            InjectionPoint::JsonField(path) => Some(path.join(".")),
            InjectionPoint::JsonObject(path) if path.is_empty() => None,
            InjectionPoint::JsonObject(path) => Some(path.join(".")),
            InjectionPoint::UrlParam(name) => Some(format!("query.{}", name)),
            InjectionPoint::Header(name) => Some(format!("header.{}", name)),
        }
    }
}

/// Boundary values and payloads the catalog injects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CatalogOptions {
    pub long_string_length: usize,
    pub large_number: u64,
    pub malicious_string: String,
    pub special_characters: String,
    pub unicode_characters: String,
    pub extra_field_name: String,
    pub extra_field_value: Value,
    pub mutate_headers: bool,
    pub mutate_query: bool,
}

impl Default for CatalogOptions {
    fn default() -> Self {
        Self {
            long_string_length: 5000,
            large_number: u64::MAX,
            malicious_string: "' OR '1'='1'--<script>alert(1)</script>".to_string(),
            special_characters: "!@#$%^&*()_+-=[]{}|;':\",./<>?`~\\".to_string(),
            unicode_characters: "\u{1D54C}\u{1D55F}\u{1D55A} \u{6D4B}\u{8BD5} \u{1F680} \u{202E}\u{0192}"
                .to_string(),
            extra_field_name: "__mutaprobe_extra".to_string(),
            extra_field_value: json!("unexpected"),
            mutate_headers: true,
            mutate_query: true,
        }
    }
}

/// Headers excluded from mutation: hop-by-hop or computed by the client.
const BLACKLISTED_HEADERS: &[&str] = &[
    "host",
    "content-length",
    "content-type",
    "connection",
    "accept-encoding",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
    "via",
    "proxy-authorization",
    "proxy-connection",
];

/// Expands a base request into its ordered list of mutations.
///
/// Generation is a pure function of the base request and the options: the same
/// input always yields the same list, ids included.
#[derive(Debug, Clone, Default)]
pub struct MutationCatalog {
    options: CatalogOptions,
}

impl MutationCatalog {
    pub fn new(options: CatalogOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CatalogOptions {
        &self.options
    }

    pub fn generate(&self, base: &HttpRequest) -> Vec<Mutation> {
        let mut mutations = Vec::new();

        for point in self.extract_injection_points(base) {
            for kind in MutationType::ALL {
                let Some((request, strategy)) = self.apply(base, &point, kind) else {
                    continue;
                };
                mutations.push(Mutation {
                    id: format!("mut-{:04}", mutations.len() + 1),
                    mutation_type: kind,
                    description: describe(kind, &point),
                    request,
                    field: point.field_label(),
                    strategy,
                });
            }
        }

        mutations
    }

    /// Mutable locations in order: payload fields (depth-first, each object
    /// followed by its extra-field slot), then query parameters, then headers.
    pub fn extract_injection_points(&self, req: &HttpRequest) -> Vec<InjectionPoint> {
        let mut points = Vec::new();

        if let Some(Value::Object(map)) = &req.payload {
            extract_json_paths_recursive(map, &[], &mut points);
        }

        if self.options.mutate_query {
            if let Ok(url) = Url::parse(&req.url) {
                let mut seen: Vec<String> = Vec::new();
                for (key, _) in url.query_pairs() {
                    if !seen.iter().any(|k| k == key.as_ref()) {
                        seen.push(key.to_string());
                    }
                }
                points.extend(seen.into_iter().map(InjectionPoint::UrlParam));
            }
        }

        if self.options.mutate_headers {
            for name in req.headers.keys() {
                let lower = name.to_ascii_lowercase();
                if !BLACKLISTED_HEADERS.contains(&lower.as_str()) {
                    points.push(InjectionPoint::Header(name.clone()));
                }
            }
        }

        points
    }

    fn apply(
        &self,
        base: &HttpRequest,
        point: &InjectionPoint,
        kind: MutationType,
    ) -> Option<(HttpRequest, MutationStrategy)> {
        match point {
            InjectionPoint::JsonField(path) => {
                let payload = base.payload.as_ref()?;
                let current = get_at(payload, path)?;
                let (replacement, strategy) = self.field_replacement(current, kind)?;
                let mut mutated = payload.clone();
                let applied = match replacement {
                    Some(value) => set_at(&mut mutated, path, value),
                    None => remove_at(&mut mutated, path),
                };
                applied.then(|| {
                    let mut req = base.clone();
                    req.payload = Some(mutated);
                    (req, strategy)
                })
            }
            InjectionPoint::JsonObject(path) => {
                if kind != MutationType::ExtraField {
                    return None;
                }
                let mut mutated = base.payload.clone()?;
                let target = get_at_mut(&mut mutated, path)?.as_object_mut()?;
                if target.contains_key(&self.options.extra_field_name) {
                    return None;
                }
                target.insert(
                    self.options.extra_field_name.clone(),
                    self.options.extra_field_value.clone(),
                );
                let mut req = base.clone();
                req.payload = Some(mutated);
                Some((req, MutationStrategy::AddField))
            }
            InjectionPoint::UrlParam(name) => {
                let (value, strategy) = self.string_replacement(kind)?;
                let mut req = base.clone();
                req.url = mutate_url_param(&base.url, name, value.as_deref())?;
                Some((req, strategy))
            }
            InjectionPoint::Header(name) => {
                let (value, strategy) = self.string_replacement(kind)?;
                let mut req = base.clone();
                match value {
                    Some(v) => {
                        HeaderValue::from_str(&v).ok()?;
                        req.headers.insert(name.clone(), v);
                    }
                    None => {
                        req.headers.remove(name);
                    }
                }
                Some((req, strategy))
            }
        }
    }

    /// Replacement for a payload field. `Some(None)` means remove the key;
    /// `None` means the kind does not apply to this value.
    fn field_replacement(
        &self,
        current: &Value,
        kind: MutationType,
    ) -> Option<(Option<Value>, MutationStrategy)> {
        use MutationStrategy::*;
        use MutationType::*;

        let opts = &self.options;
        let replace = |v: Value, s: MutationStrategy| Some((Some(v), s));

        match (kind, current) {
            (EmptyString, Value::String(_)) => replace(json!(""), ReplaceValue),
            (LongString, Value::String(_)) => {
                replace(Value::String("A".repeat(opts.long_string_length)), BoundaryValue)
            }
            (MaliciousString, Value::String(_)) => {
                replace(Value::String(opts.malicious_string.clone()), ReplaceValue)
            }
            (SpecialCharacters, Value::String(_)) => {
                replace(Value::String(opts.special_characters.clone()), ReplaceValue)
            }
            (UnicodeCharacters, Value::String(_)) => {
                replace(Value::String(opts.unicode_characters.clone()), ReplaceValue)
            }
            (BooleanType, v) if !v.is_boolean() => replace(json!(true), TypeConfusion),
            (ArrayType, v) if !v.is_array() => replace(json!([v]), TypeConfusion),
            (NullValue, v) if !v.is_null() => replace(Value::Null, ReplaceValue),
            (UndefinedValue, v) if !v.is_null() => replace(json!("undefined"), TypeConfusion),
            (LargeNumber, Value::Number(_)) => replace(json!(opts.large_number), BoundaryValue),
            (NegativeNumber, Value::Number(n)) => replace(negated(n), BoundaryValue),
            (ZeroValue, Value::Number(n)) if n.as_f64() != Some(0.0) => {
                replace(json!(0), BoundaryValue)
            }
            (MissingField, _) => Some((None, RemoveField)),
            (InvalidType, v) => {
                let wrong = match v {
                    Value::String(_) => json!(12345),
                    Value::Number(_) => json!("not_a_number"),
                    Value::Bool(b) => json!(b.to_string()),
                    Value::Array(_) => json!("not_an_array"),
                    Value::Object(_) => json!("not_an_object"),
                    Value::Null => return None,
                };
                replace(wrong, TypeConfusion)
            }
            _ => None,
        }
    }

    /// Replacement for query parameters and headers, which only carry text.
    fn string_replacement(&self, kind: MutationType) -> Option<(Option<String>, MutationStrategy)> {
        let opts = &self.options;
        let value = match kind {
            MutationType::EmptyString => String::new(),
            MutationType::LongString => "A".repeat(opts.long_string_length),
            MutationType::MaliciousString => opts.malicious_string.clone(),
            MutationType::SpecialCharacters => opts.special_characters.clone(),
            MutationType::UnicodeCharacters => opts.unicode_characters.clone(),
            MutationType::MissingField => return Some((None, MutationStrategy::RemoveField)),
            _ => return None,
        };
        let strategy = if kind == MutationType::LongString {
            MutationStrategy::BoundaryValue
        } else {
            MutationStrategy::ReplaceValue
        };
        Some((Some(value), strategy))
    }
}

fn extract_json_paths_recursive(
    map: &Map<String, Value>,
    current_path: &[String],
    points: &mut Vec<InjectionPoint>,
) {
    for (key, val) in map {
        let mut path = current_path.to_vec();
        path.push(key.clone());
        points.push(InjectionPoint::JsonField(path.clone()));
        if let Value::Object(child) = val {
            extract_json_paths_recursive(child, &path, points);
        }
    }
    points.push(InjectionPoint::JsonObject(current_path.to_vec()));
}

fn get_at<'a>(value: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(value, |v, key| v.as_object()?.get(key))
}

fn get_at_mut<'a>(value: &'a mut Value, path: &[String]) -> Option<&'a mut Value> {
    path.iter()
        .try_fold(value, |v, key| v.as_object_mut()?.get_mut(key))
}

fn set_at(value: &mut Value, path: &[String], replacement: Value) -> bool {
    match get_at_mut(value, path) {
        Some(target) => {
            *target = replacement;
            true
        }
        None => false,
    }
}

fn remove_at(value: &mut Value, path: &[String]) -> bool {
    let Some((last, parent_path)) = path.split_last() else {
        return false;
    };
    get_at_mut(value, parent_path)
        .and_then(Value::as_object_mut)
        .and_then(|obj| obj.remove(last))
        .is_some()
}

fn negated(n: &Number) -> Value {
    if let Some(i) = n.as_i64() {
        if i > 0 {
            return json!(-i);
        }
    } else if let Some(f) = n.as_f64() {
        if f > 0.0 {
            return json!(-f);
        }
    }
    json!(-1)
}

/// Rewrites one query parameter, or drops it when `value` is `None`.
fn mutate_url_param(raw: &str, param_name: &str, value: Option<&str>) -> Option<String> {
    let mut url = Url::parse(raw).ok()?;

    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter_map(|(k, v)| {
            if k == param_name {
                value.map(|p| (k.to_string(), p.to_string()))
            } else {
                Some((k.to_string(), v.to_string()))
            }
        })
        .collect();

    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }

    Some(url.to_string())
}

fn describe(kind: MutationType, point: &InjectionPoint) -> String {
    let target = match point {
        InjectionPoint::JsonField(path) => format!("payload field '{}'", path.join(".")),
        InjectionPoint::JsonObject(path) if path.is_empty() => "payload root".to_string(),
        InjectionPoint::JsonObject(path) => format!("payload object '{}'", path.join(".")),
        InjectionPoint::UrlParam(name) => format!("query parameter '{}'", name),
        InjectionPoint::Header(name) => format!("header '{}'", name),
    };
    match kind {
        MutationType::EmptyString => format!("Set {} to an empty string", target),
        MutationType::LongString => format!("Set {} to an oversized string", target),
        MutationType::MaliciousString => format!("Inject a malicious string into {}", target),
        MutationType::BooleanType => format!("Replace {} with a boolean", target),
        MutationType::ArrayType => format!("Wrap {} in an array", target),
        MutationType::NullValue => format!("Set {} to null", target),
        MutationType::UndefinedValue => format!("Set {} to \"undefined\"", target),
        MutationType::LargeNumber => format!("Set {} to an out-of-range number", target),
        MutationType::NegativeNumber => format!("Set {} to a negative number", target),
        MutationType::ZeroValue => format!("Set {} to zero", target),
        MutationType::SpecialCharacters => format!("Fill {} with special characters", target),
        MutationType::UnicodeCharacters => format!("Fill {} with unicode characters", target),
        MutationType::MissingField => format!("Remove {}", target),
        MutationType::ExtraField => format!("Add an unexpected field to {}", target),
        MutationType::InvalidType => format!("Give {} a value of the wrong type", target),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpMethod;

    fn create_test_request_json() -> HttpRequest {
        HttpRequest::new(HttpMethod::Post, "https://good.example/items", 5000)
            .with_payload(json!({"name": "x"}))
    }

    fn kinds(mutations: &[Mutation]) -> Vec<MutationType> {
        mutations.iter().map(|m| m.mutation_type).collect()
    }

    #[test]
    fn test_string_field_kinds() {
        let catalog = MutationCatalog::default();
        let mutations = catalog.generate(&create_test_request_json());

        assert_eq!(
            kinds(&mutations),
            vec![
                MutationType::EmptyString,
                MutationType::LongString,
                MutationType::MaliciousString,
                MutationType::BooleanType,
                MutationType::ArrayType,
                MutationType::NullValue,
                MutationType::UndefinedValue,
                MutationType::SpecialCharacters,
                MutationType::UnicodeCharacters,
                MutationType::MissingField,
                MutationType::InvalidType,
                MutationType::ExtraField,
            ]
        );
        assert!(mutations[..11].iter().all(|m| m.field.as_deref() == Some("name")));
        assert_eq!(mutations[11].field, None);
    }

    #[test]
    fn test_generation_is_deterministic() {
        let catalog = MutationCatalog::default();
        let req = HttpRequest::new(HttpMethod::Put, "https://api.test/u/1?expand=true", 3000)
            .with_header("X-Tenant", "acme")
            .with_payload(json!({"user": {"name": "a", "age": 3}, "tags": ["x"], "ok": false}));

        let first = catalog.generate(&req);
        let second = catalog.generate(&req);
        assert_eq!(first, second);
        assert!(!first.is_empty());
        assert_eq!(first[0].id, "mut-0001");
    }

    #[test]
    fn test_numeric_field_skips_string_kinds() {
        let catalog = MutationCatalog::default();
        let req = HttpRequest::new(HttpMethod::Post, "https://api.test/n", 1000)
            .with_payload(json!({"qty": 7}));
        let mutations = catalog.generate(&req);
        let qty: Vec<_> = mutations
            .iter()
            .filter(|m| m.field.as_deref() == Some("qty"))
            .map(|m| m.mutation_type)
            .collect();

        assert!(qty.contains(&MutationType::LargeNumber));
        assert!(qty.contains(&MutationType::NegativeNumber));
        assert!(qty.contains(&MutationType::ZeroValue));
        assert!(!qty.contains(&MutationType::EmptyString));
        assert!(!qty.contains(&MutationType::MaliciousString));

        let negative = mutations
            .iter()
            .find(|m| m.mutation_type == MutationType::NegativeNumber)
            .unwrap();
        assert_eq!(negative.request.payload, Some(json!({"qty": -7})));
    }

    #[test]
    fn test_zero_skipped_for_zero_field() {
        let catalog = MutationCatalog::default();
        let req = HttpRequest::new(HttpMethod::Post, "https://api.test/n", 1000)
            .with_payload(json!({"qty": 0}));
        let mutations = catalog.generate(&req);
        assert!(!kinds(&mutations).contains(&MutationType::ZeroValue));
    }

    #[test]
    fn test_missing_field_removes_key() {
        let catalog = MutationCatalog::default();
        let mutations = catalog.generate(&create_test_request_json());
        let missing = mutations
            .iter()
            .find(|m| m.mutation_type == MutationType::MissingField)
            .unwrap();
        assert_eq!(missing.request.payload, Some(json!({})));
        assert_eq!(missing.strategy, MutationStrategy::RemoveField);
    }

    #[test]
    fn test_nested_json_fields() {
        let catalog = MutationCatalog::default();
        let req = HttpRequest::new(HttpMethod::Post, "https://api.test/u", 1000)
            .with_payload(json!({"user": {"profile": {"city": "Oslo"}}}));
        let points = catalog.extract_injection_points(&req);

        let path = |p: &[&str]| p.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert!(points.contains(&InjectionPoint::JsonField(path(&["user", "profile", "city"]))));
        assert!(points.contains(&InjectionPoint::JsonObject(path(&["user", "profile"]))));
        assert!(points.contains(&InjectionPoint::JsonObject(vec![])));

        let mutations = catalog.generate(&req);
        let malicious = mutations
            .iter()
            .find(|m| {
                m.mutation_type == MutationType::MaliciousString
                    && m.field.as_deref() == Some("user.profile.city")
            })
            .unwrap();
        let payload = malicious.request.payload.as_ref().unwrap();
        assert_eq!(
            payload["user"]["profile"]["city"],
            json!(catalog.options().malicious_string)
        );
    }

    #[test]
    fn test_extra_field_added_to_root() {
        let catalog = MutationCatalog::default();
        let mutations = catalog.generate(&create_test_request_json());
        let extra = mutations
            .iter()
            .find(|m| m.mutation_type == MutationType::ExtraField)
            .unwrap();
        assert_eq!(
            extra.request.payload,
            Some(json!({"name": "x", "__mutaprobe_extra": "unexpected"}))
        );
    }

    #[test]
    fn test_query_mutations_without_payload() {
        let catalog = MutationCatalog::default();
        let req = HttpRequest::new(HttpMethod::Get, "https://api.test/search?q=shoes", 1000);
        let mutations = catalog.generate(&req);

        assert_eq!(mutations.len(), 6);
        assert!(mutations.iter().all(|m| m.field.as_deref() == Some("query.q")));
        let missing = mutations
            .iter()
            .find(|m| m.mutation_type == MutationType::MissingField)
            .unwrap();
        assert_eq!(missing.request.url, "https://api.test/search");
    }

    #[test]
    fn test_header_mutations_skip_blacklist() {
        let catalog = MutationCatalog::default();
        let req = HttpRequest::new(HttpMethod::Get, "https://api.test/", 1000)
            .with_header("Content-Type", "application/json")
            .with_header("X-Api-Key", "secret");
        let points = catalog.extract_injection_points(&req);

        assert_eq!(points, vec![InjectionPoint::Header("X-Api-Key".to_string())]);
        let mutations = catalog.generate(&req);
        assert!(mutations
            .iter()
            .all(|m| m.field.as_deref() == Some("header.X-Api-Key")));
        assert!(mutations
            .iter()
            .any(|m| m.mutation_type == MutationType::MissingField
                && !m.request.headers.contains_key("X-Api-Key")));
    }

    #[test]
    fn test_no_mutable_fields_yields_empty_catalog() {
        let catalog = MutationCatalog::default();
        let req = HttpRequest::new(HttpMethod::Get, "https://api.test/health", 1000);
        assert!(catalog.generate(&req).is_empty());

        let non_object = HttpRequest::new(HttpMethod::Post, "https://api.test/raw", 1000)
            .with_payload(json!(["a", "b"]));
        assert!(catalog.generate(&non_object).is_empty());
    }

    #[test]
    fn test_long_string_length_is_configurable() {
        let catalog = MutationCatalog::new(CatalogOptions {
            long_string_length: 64,
            ..CatalogOptions::default()
        });
        let mutations = catalog.generate(&create_test_request_json());
        let long = mutations
            .iter()
            .find(|m| m.mutation_type == MutationType::LongString)
            .unwrap();
        assert_eq!(
            long.request.payload.as_ref().unwrap()["name"].as_str().unwrap().len(),
            64
        );
    }
}

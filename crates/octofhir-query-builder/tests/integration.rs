//! End-to-end tests of query construction through the public API.
//!
//! Every test builds a complete statement with [`QueryBuilder`] over an
//! in-memory identity DAO, so parameter ids and table names are predictable.

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Barrier};
use std::thread;

use octofhir_query_builder::compartment::CompartmentRules;
use octofhir_query_builder::{
    BindStyle, Capabilities, CacheConfig, GeneratedQuery, IdentityCache, IdentityDao,
    MemoryIdentityDao, Pagination, PaginationDialect, ParameterValue, QueryBuilder,
    QueryBuilderConfig, QueryBuilderError, QueryParameter, SearchModifier, SearchParameter,
    SearchParameterRegistry, SearchParameterType, SearchPrefix, SqlValue, TenantKey,
};
use octofhir_query_builder::cache::CacheKind;
use time::Duration;
use time::macros::datetime;

// =============================================================================
// Test Infrastructure
// =============================================================================

fn init_tracing() {
    use std::sync::OnceLock;
    use tracing_subscriber::prelude::*;
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "octofhir_query_builder=warn".into()),
            )
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    });
}

const PARAMETER_NAMES: &[(&str, i32)] = &[
    ("family", 1),
    ("code", 2),
    ("birthdate", 3),
    ("patient", 4),
    ("device", 5),
    ("subject", 6),
    ("_lastUpdated", 7),
    ("general-practitioner", 8),
];

fn dao(tenant: &TenantKey) -> MemoryIdentityDao {
    let mut dao = MemoryIdentityDao::new()
        .with_id(CacheKind::CodeSystem, tenant, "http://loinc.org", 20)
        .with_id(CacheKind::ResourceType, tenant, "Patient", 1)
        .with_id(CacheKind::ResourceType, tenant, "Observation", 2)
        .with_id(CacheKind::ResourceType, tenant, "Device", 3);
    for (name, id) in PARAMETER_NAMES {
        dao = dao.with_id(CacheKind::ParameterName, tenant, name, *id);
    }
    dao
}

fn registry() -> SearchParameterRegistry {
    let registry = SearchParameterRegistry::with_common_parameters();
    registry.register(
        SearchParameter::new(
            "patient",
            "http://hl7.org/fhir/SearchParameter/clinical-patient",
            SearchParameterType::Reference,
            vec!["Observation".into(), "Device".into()],
        )
        .with_targets(vec!["Patient".into()]),
    );
    registry.register(
        SearchParameter::new(
            "device",
            "http://hl7.org/fhir/SearchParameter/Observation-device",
            SearchParameterType::Reference,
            vec!["Observation".into()],
        )
        .with_targets(vec!["Device".into(), "DeviceMetric".into()]),
    );
    registry
}

fn builder_with(config: QueryBuilderConfig) -> (QueryBuilder, TenantKey) {
    init_tracing();
    let tenant = TenantKey::new("acme", "default");
    let cache = IdentityCache::new(Arc::new(dao(&tenant)), CacheConfig::default());
    let builder = QueryBuilder::new(Arc::new(cache), Arc::new(registry()), config);
    (builder, tenant)
}

fn builder() -> (QueryBuilder, TenantKey) {
    builder_with(QueryBuilderConfig::default())
}

fn string(code: &str, value: &str) -> QueryParameter {
    QueryParameter::new(code, SearchParameterType::String)
        .with_value(ParameterValue::String(value.to_string()))
}

fn token(code: &str, raw: &str) -> QueryParameter {
    QueryParameter::new(code, SearchParameterType::Token).with_value(ParameterValue::parse_token(raw))
}

fn date(prefix: SearchPrefix, raw: &str) -> QueryParameter {
    QueryParameter::new("birthdate", SearchParameterType::Date)
        .with_prefixed_value(prefix, ParameterValue::Date(raw.to_string()))
}

fn rows(resource_type: &str, params: &[QueryParameter]) -> GeneratedQuery {
    let (builder, tenant) = builder();
    builder
        .build_query(&tenant, resource_type, params, &Pagination::default())
        .unwrap()
}

fn where_clause(sql: &str) -> &str {
    let start = sql.find(" WHERE ").unwrap();
    let end = sql.find(" ORDER BY ").unwrap_or(sql.len());
    &sql[start..end]
}

// =============================================================================
// Value semantics
// =============================================================================

#[test]
fn test_string_prefix_match_on_normalized_column() {
    let query = rows("Patient", &[string("family", "Müller")]);

    assert!(query.sql.contains(
        "FROM Patient_RESOURCES R, Patient_LOGICAL_RESOURCES LR, Patient_STR_VALUES P1 WHERE"
    ));
    assert!(query.sql.contains(
        "AND P1.LOGICAL_RESOURCE_ID = LR.LOGICAL_RESOURCE_ID \
         AND (P1.PARAMETER_NAME_ID = 1 AND (P1.STR_VALUE_LCASE LIKE ? ESCAPE '+'))"
    ));
    assert_eq!(query.binds, vec![SqlValue::text("muller%")]);
}

#[test]
fn test_contains_escapes_wildcards() {
    let param = string("family", "50%").with_modifier(SearchModifier::Contains);
    let query = rows("Patient", &[param]);
    assert_eq!(query.binds, vec![SqlValue::text("%50+%%")]);
}

#[test]
fn test_token_and_versus_not_or() {
    let plain = rows("Observation", &[token("code", "http://loinc.org|1234-5")]);
    assert!(plain.sql.contains("(P1.TOKEN_VALUE = ? AND P1.CODE_SYSTEM_ID = ?)"));
    assert_eq!(
        plain.binds,
        vec![SqlValue::text("1234-5"), SqlValue::Integer(20)]
    );

    let negated = token("code", "http://loinc.org|1234-5").with_modifier(SearchModifier::Not);
    let negated = rows("Observation", &[negated]);
    assert!(negated.sql.contains("(P1.TOKEN_VALUE <> ? OR P1.CODE_SYSTEM_ID <> ?)"));
}

#[test]
fn test_date_instant_eq_is_half_open() {
    let query = rows("Patient", &[date(SearchPrefix::Eq, "2020-03-15T10:30:00Z")]);
    let instant = datetime!(2020-03-15 10:30:00 UTC);

    assert!(query.sql.contains("(P1.DATE_VALUE >= ? AND P1.DATE_VALUE < ?)"));
    assert_eq!(query.binds[0], SqlValue::Timestamp(instant));
    assert_eq!(
        query.binds[1],
        SqlValue::Timestamp(instant + Duration::microseconds(1))
    );
}

#[test]
fn test_year_covers_whole_year() {
    let query = rows("Patient", &[date(SearchPrefix::Eq, "2020")]);
    assert_eq!(
        query.binds[..2],
        [
            SqlValue::Timestamp(datetime!(2020-01-01 00:00:00 UTC)),
            SqlValue::Timestamp(datetime!(2021-01-01 00:00:00 UTC)),
        ]
    );
}

#[test]
fn test_ge_and_lt_split_at_the_same_instant() {
    let raw = "2021-06-01T00:00:00Z";
    let ge = rows("Patient", &[date(SearchPrefix::Ge, raw)]);
    let lt = rows("Patient", &[date(SearchPrefix::Lt, raw)]);

    assert!(ge.sql.contains("P1.DATE_VALUE >= ?"));
    assert!(lt.sql.contains("P1.DATE_VALUE < ?"));
    assert_eq!(ge.binds[0], lt.binds[0]);
}

#[test]
fn test_dates_at_the_upper_limit_are_rejected() {
    let config = QueryBuilderConfig::default().with_bind_style(BindStyle::Inline);
    let (builder, tenant) = builder_with(config);

    for raw in [
        "9999-12-31T23:00:00-05:00",
        "9999-12-31T23:59:59.999999Z",
        "9999-12-31T23:59",
        "9999-12-31",
    ] {
        let err = builder
            .build_count_query(&tenant, "Patient", &[date(SearchPrefix::Ge, raw)])
            .unwrap_err();
        assert!(matches!(err, QueryBuilderError::MalformedParameter { .. }), "{raw}");
    }

    let query = builder
        .build_count_query(&tenant, "Patient", &[date(SearchPrefix::Ge, "9999-12-30")])
        .unwrap();
    assert!(query.sql.contains("P1.DATE_VALUE >= TIMESTAMP '9999-12-30 00:00:00.000000'"));
}

#[test]
fn test_bare_reference_gets_single_target_type() {
    let param = QueryParameter::new("patient", SearchParameterType::Reference)
        .with_value(ParameterValue::Reference("123".into()));
    let query = rows("Observation", &[param]);

    assert!(query.sql.contains("(P1.PARAMETER_NAME_ID = 4 AND (P1.STR_VALUE = ?))"));
    assert_eq!(query.binds, vec![SqlValue::text("Patient/123")]);
}

// =============================================================================
// Statement shape
// =============================================================================

#[test]
fn test_row_and_count_share_where_clause() {
    let (builder, tenant) = builder();
    let params = vec![
        string("family", "Smith"),
        date(SearchPrefix::Ge, "1980"),
        QueryParameter::new("_lastUpdated", SearchParameterType::Date)
            .with_prefixed_value(SearchPrefix::Lt, ParameterValue::Date("2024-01-01".into())),
    ];

    let query = builder
        .build_query(&tenant, "Patient", &params, &Pagination::new(2, 25))
        .unwrap();
    let count = builder.build_count_query(&tenant, "Patient", &params).unwrap();

    assert_eq!(where_clause(&query.sql), where_clause(&count.sql));
    assert_eq!(query.binds, count.binds);
    assert!(count.sql.starts_with("SELECT COUNT(*) FROM "));
    assert!(query.sql.ends_with("ORDER BY LR.LOGICAL_RESOURCE_ID ASC LIMIT 25 OFFSET 25"));

    // _lastUpdated is sorted ahead of the joined parameters.
    let clause = where_clause(&query.sql);
    assert!(clause.find("R.LAST_UPDATED <").unwrap() < clause.find("P1.").unwrap());
}

#[test]
fn test_joined_aliases_follow_parameter_order() {
    let query = rows(
        "Patient",
        &[string("family", "Smith"), date(SearchPrefix::Eq, "1980-05")],
    );
    assert!(query.sql.contains("Patient_STR_VALUES P1, Patient_DATE_VALUES P2 WHERE"));
    assert!(query.sql.contains("AND P2.LOGICAL_RESOURCE_ID = LR.LOGICAL_RESOURCE_ID AND (P2.PARAMETER_NAME_ID = 3"));
}

#[test]
fn test_two_hop_chain() {
    let param = QueryParameter::new("device", SearchParameterType::Reference)
        .with_modifier(SearchModifier::Type("Device".into()))
        .with_chain(vec![
            QueryParameter::new("patient", SearchParameterType::Reference),
            string("family", "Smith"),
        ]);
    let query = rows("Observation", &[param]);

    assert!(query.sql.contains("ESCAPE '+'))))) ORDER BY"));
    let innermost = &query.sql[query.sql.rfind("SELECT '").unwrap()..];
    assert!(innermost.starts_with("SELECT 'Patient' || '/' || CLR2.LOGICAL_ID"));
    assert_eq!(query.binds, vec![SqlValue::text("smith%")]);
}

#[test]
fn test_compartment_search() {
    let (builder, tenant) = builder();
    let rules = CompartmentRules::new().with_rule(
        "Patient",
        "Observation",
        vec!["subject".into(), "device.patient:Device".into()],
    );
    let inclusion = rules
        .build_inclusion_parameter("Patient", "p1", "Observation")
        .unwrap();

    let query = builder
        .build_query(&tenant, "Observation", &[inclusion], &Pagination::default())
        .unwrap();
    assert!(query.sql.contains("Observation_STR_VALUES P1"));
    assert!(query.sql.contains(
        "((P1.PARAMETER_NAME_ID = 6 AND P1.STR_VALUE = ?) OR (P1.PARAMETER_NAME_ID = 5 AND P1.STR_VALUE IN (SELECT 'Device'"
    ));
    assert_eq!(
        query.binds,
        vec![SqlValue::text("Patient/p1"), SqlValue::text("Patient/p1")]
    );
}

#[test]
fn test_offset_fetch_and_inline_binds() {
    let config = QueryBuilderConfig::default()
        .with_pagination_dialect(PaginationDialect::OffsetFetch)
        .with_bind_style(BindStyle::Inline);
    let (builder, tenant) = builder_with(config);

    let query = builder
        .build_query(
            &tenant,
            "Patient",
            &[string("family", "d'Arcy")],
            &Pagination::new(3, 20),
        )
        .unwrap();
    assert!(query.sql.contains("LIKE 'd''arcy%' ESCAPE '+'"));
    assert!(query.sql.ends_with("OFFSET 40 ROWS FETCH NEXT 20 ROWS ONLY"));
    assert!(query.binds.is_empty());
}

#[test]
fn test_dialect_follows_dao_when_not_configured() {
    init_tracing();
    let tenant = TenantKey::default();
    let dao = dao(&tenant).with_limit_offset(false);
    let cache = Arc::new(IdentityCache::new(Arc::new(dao), CacheConfig::default()));
    let builder = QueryBuilder::new(cache, Arc::new(registry()), QueryBuilderConfig::default());

    assert_eq!(builder.pagination_dialect(), PaginationDialect::OffsetFetch);
}

#[test]
fn test_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
pagination_dialect = "offset-fetch"
max_page_size = 50

[capabilities]
chained_search = false
"#
    )
    .unwrap();

    let config = QueryBuilderConfig::from_file(file.path()).unwrap();
    let (builder, tenant) = builder_with(config);

    let err = builder
        .build_query(&tenant, "Patient", &[], &Pagination::new(1, 100))
        .unwrap_err();
    assert!(matches!(err, QueryBuilderError::MalformedParameter { .. }));

    let chained = QueryParameter::new("general-practitioner", SearchParameterType::Reference)
        .with_modifier(SearchModifier::Type("Practitioner".into()))
        .with_chain(vec![string("family", "House")]);
    let err = builder
        .build_count_query(&tenant, "Patient", &[chained])
        .unwrap_err();
    assert!(err.is_unsupported());
}

// =============================================================================
// Capability gate
// =============================================================================

#[test]
fn test_disabled_features_are_unsupported() {
    let config = QueryBuilderConfig::default().with_capabilities(Capabilities {
        chained_search: false,
        compartment_search: false,
    });
    let (builder, tenant) = builder_with(config);

    let chained = QueryParameter::new("patient", SearchParameterType::Reference)
        .with_chain(vec![string("family", "Smith")]);
    let err = builder
        .build_query(&tenant, "Observation", &[chained], &Pagination::default())
        .unwrap_err();
    assert!(err.is_unsupported());

    let inclusion = CompartmentRules::new()
        .with_rule("Patient", "Observation", vec!["subject".into()])
        .build_inclusion_parameter("Patient", "p1", "Observation")
        .unwrap();
    let err = builder
        .build_count_query(&tenant, "Observation", &[inclusion])
        .unwrap_err();
    assert!(err.is_unsupported());
}

#[test]
fn test_unsupported_modifiers_are_not_dropped() {
    let (builder, tenant) = builder();
    let text = token("code", "fever").with_modifier(SearchModifier::Text);
    let err = builder
        .build_count_query(&tenant, "Observation", &[text])
        .unwrap_err();
    assert!(err.is_unsupported());

    let identifier = QueryParameter::new("patient", SearchParameterType::Reference)
        .with_modifier(SearchModifier::Identifier)
        .with_value(ParameterValue::Reference("http://mrn|1".into()));
    let err = builder
        .build_count_query(&tenant, "Observation", &[identifier])
        .unwrap_err();
    assert!(err.is_unsupported());
}

// =============================================================================
// Identity cache
// =============================================================================

#[test]
fn test_concurrent_lookups_agree_with_bulk_load() {
    init_tracing();
    let tenant = TenantKey::new("acme", "default");
    let dao = Arc::new(dao(&tenant));
    let cache = Arc::new(IdentityCache::new(dao.clone(), CacheConfig::default()));

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let cache = Arc::clone(&cache);
            let tenant = tenant.clone();
            thread::spawn(move || {
                let mut seen = HashMap::new();
                for offset in 0..PARAMETER_NAMES.len() {
                    let (name, _) = PARAMETER_NAMES[(worker + offset) % PARAMETER_NAMES.len()];
                    let id = cache.parameter_name_id(&tenant, name).unwrap();
                    seen.insert(name.to_string(), id);
                }
                seen
            })
        })
        .collect();

    let bulk = dao.read_all_parameter_names(&tenant).unwrap();
    for handle in handles {
        for (name, id) in handle.join().unwrap() {
            assert_eq!(id, bulk.get(&name).copied(), "id of {name}");
        }
    }

    cache.init_cache(&tenant).unwrap();
    assert!(cache.report_discrepancies(&tenant).unwrap().is_empty());
    assert_eq!(
        cache.dump_contents(&tenant).parameter_names.len(),
        PARAMETER_NAMES.len()
    );
}

#[test]
fn test_racing_init_cache_loads_once() {
    init_tracing();
    let tenant = TenantKey::new("acme", "default");
    let dao = Arc::new(dao(&tenant));
    let cache = Arc::new(IdentityCache::new(dao.clone(), CacheConfig::default()));
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            let tenant = tenant.clone();
            thread::spawn(move || {
                barrier.wait();
                cache.init_cache(&tenant).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // One bulk read per cache kind.
    assert_eq!(dao.bulk_load_count(), 3);
    assert!(cache.is_initialized(&tenant));
    assert_eq!(cache.parameter_name_id(&tenant, "family").unwrap(), Some(1));
    assert_eq!(dao.lookup_count(), 0);
}

#[test]
fn test_tenants_do_not_share_ids() {
    init_tracing();
    let acme = TenantKey::new("acme", "default");
    let other = TenantKey::new("other", "default");
    let dao = dao(&acme).with_id(CacheKind::ParameterName, &other, "family", 99);
    let cache = Arc::new(IdentityCache::new(Arc::new(dao), CacheConfig::default()));
    let builder = QueryBuilder::new(cache, Arc::new(registry()), QueryBuilderConfig::default());

    let acme_sql = builder
        .build_parameter_fragment(&acme, "Patient", &string("family", "x"))
        .unwrap()
        .sql;
    let other_sql = builder
        .build_parameter_fragment(&other, "Patient", &string("family", "x"))
        .unwrap()
        .sql;
    assert!(acme_sql.contains("PARAMETER_NAME_ID = 1 AND"));
    assert!(other_sql.contains("PARAMETER_NAME_ID = 99 AND"));
}

#[test]
fn test_dao_failure_surfaces_as_data_access_error() {
    init_tracing();
    let tenant = TenantKey::default();
    let dao = Arc::new(dao(&tenant));
    let cache = Arc::new(IdentityCache::new(dao.clone(), CacheConfig::default()));
    let builder = QueryBuilder::new(cache, Arc::new(registry()), QueryBuilderConfig::default());

    dao.set_failure(Some(octofhir_query_builder::DataAccessError::Connection(
        "refused".into(),
    )));
    let err = builder
        .build_count_query(&tenant, "Patient", &[string("family", "x")])
        .unwrap_err();
    assert!(matches!(err, QueryBuilderError::DataAccess(_)));
}

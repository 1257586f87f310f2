//! Tests for the SQL compiler.

use super::*;
use crate::index::SortDirection;
use crate::typemap::PropertyType;
use crate::{ConnectorError, PropertyDefinition, SqlValue};
use serde_json::json;

    const COLS: &str = "\"id\",\"name\",\"age\",\"vip\",\"address\",\"tags\",\"location\",\"firstname\"";

    fn customer() -> ModelDefinition {
        ModelDefinition::new("Customer")
            .with_property("id", PropertyDefinition::new(PropertyType::String).id().with_length(20))
            .with_property("name", PropertyDefinition::new(PropertyType::String).with_length(40))
            .with_property("age", PropertyDefinition::new(PropertyType::Number))
            .with_property("vip", PropertyDefinition::new(PropertyType::Boolean))
            .with_property("address", PropertyDefinition::new(PropertyType::Object))
            .with_property(
                "tags",
                PropertyDefinition::new(PropertyType::Array).with_data_type("text[]"),
            )
            .with_property("location", PropertyDefinition::new(PropertyType::GeoPoint))
            .with_property("firstName", PropertyDefinition::new(PropertyType::String))
    }

    fn numeric_model() -> ModelDefinition {
        ModelDefinition::new("Counter")
            .with_property("id", PropertyDefinition::new(PropertyType::Number).id().generated())
            .with_property("value", PropertyDefinition::new(PropertyType::Number))
    }

    fn where_sql(filter: serde_json::Value) -> Compiled {
        let tree = FilterTree::from_json(&filter).unwrap();
        compile_where(&customer(), &tree).unwrap()
    }

    #[test]
    fn test_null_equality() {
        let compiled = where_sql(json!({"id": null}));
        assert_eq!(compiled.sql(), "\"id\" IS NULL");
        assert_eq!(compiled.params().len(), 0);

        let compiled = where_sql(json!({"name": {"neq": null}}));
        assert_eq!(compiled.sql(), "\"name\" IS NOT NULL");
        assert_eq!(compiled.params().len(), 0);
    }

    #[test]
    fn test_bare_value_equality() {
        let compiled = where_sql(json!({"name": "Ann", "age": 30}));
        assert_eq!(compiled.sql(), "\"name\"=$1 AND \"age\"=$2");
        assert_eq!(
            compiled.params(),
            &[SqlValue::Text("Ann".into()), SqlValue::BigInt(30)]
        );
    }

    #[test]
    fn test_comparison_operators() {
        let compiled = where_sql(json!({"age": {"gt": 1, "gte": 2, "lt": 3, "lte": 4, "neq": 5}}));
        assert_eq!(
            compiled.sql(),
            "\"age\">$1 AND \"age\">=$2 AND \"age\"<$3 AND \"age\"<=$4 AND \"age\"!=$5"
        );
        assert_eq!(compiled.params().len(), 5);
    }

    #[test]
    fn test_empty_inq_matches_null() {
        let compiled = where_sql(json!({"id": {"inq": []}}));
        assert_eq!(compiled.sql(), "\"id\" IN ($1)");
        assert_eq!(compiled.params(), &[SqlValue::Null]);
    }

    #[test]
    fn test_empty_nin_is_skipped() {
        let compiled = where_sql(json!({"id": {"nin": []}}));
        assert!(compiled.fragment.is_empty());

        let compiled = where_sql(json!({"id": {"nin": []}, "age": 3}));
        assert_eq!(compiled.sql(), "\"age\"=$1");
    }

    #[test]
    fn test_inq_nin_lists() {
        let compiled = where_sql(json!({"age": {"inq": [1, "2", 3]}, "name": {"nin": ["a", "b"]}}));
        assert_eq!(compiled.sql(), "\"age\" IN ($1,$2,$3) AND \"name\" NOT IN ($4,$5)");
        assert_eq!(compiled.params()[1], SqlValue::BigInt(2));

        let compiled = where_sql(json!({"age": {"inq": 7}}));
        assert_eq!(compiled.sql(), "\"age\" IN ($1)");
    }

    #[test]
    fn test_between() {
        let compiled = where_sql(json!({"age": {"between": [18, 65]}}));
        assert_eq!(compiled.sql(), "\"age\" BETWEEN $1 AND $2");
        assert_eq!(compiled.params(), &[SqlValue::BigInt(18), SqlValue::BigInt(65)]);

        let tree = FilterTree::from_json(&json!({"age": {"between": [1]}})).unwrap();
        assert!(matches!(compile_where(&customer(), &tree), Err(ConnectorError::Query(_))));
    }

    #[test]
    fn test_unknown_properties_are_skipped() {
        let compiled = where_sql(json!({"nope": 1, "age": 2, "nope.deep": 3}));
        assert_eq!(compiled.sql(), "\"age\"=$1");
        assert_eq!(compiled.params(), &[SqlValue::BigInt(2)]);

        let compiled = where_sql(json!({"nope": 1}));
        assert!(compiled.fragment.is_empty());
    }

    #[test]
    fn test_nested_json_path() {
        let compiled = where_sql(json!({"address.city": "Oslo"}));
        assert_eq!(compiled.sql(), "\"address\"->>'city'=$1");
        assert_eq!(compiled.params(), &[SqlValue::Text("Oslo".into())]);

        let compiled = where_sql(json!({"address.geo.lat": {"gt": 10}}));
        assert_eq!(compiled.sql(), "\"address\"->'geo'->>'lat'>$1");
        assert_eq!(compiled.params(), &[SqlValue::Text("10".into())]);

        let compiled = where_sql(json!({"address.o'k": 1}));
        assert_eq!(compiled.sql(), "\"address\"->>'o''k'=$1");
    }

    #[test]
    fn test_combinators_share_one_counter() {
        let compiled = where_sql(json!({
            "or": [
                {"age": {"gt": 1}},
                {"and": [{"name": "a"}, {"age": {"between": [1, 5]}}]}
            ],
            "vip": true
        }));
        assert_eq!(
            compiled.sql(),
            "((\"age\">$1) OR (((\"name\"=$2) AND (\"age\" BETWEEN $3 AND $4)))) AND \"vip\"=$5"
        );
        assert_eq!(
            compiled.params(),
            &[
                SqlValue::BigInt(1),
                SqlValue::Text("a".into()),
                SqlValue::BigInt(1),
                SqlValue::BigInt(5),
                SqlValue::Bool(true)
            ]
        );
        assert_eq!(count_placeholders(compiled.sql()), compiled.params().len());
    }

    #[test]
    fn test_or_binds_tighter_than_sibling_keys() {
        let compiled = where_sql(json!({"or": [{"name": "a"}, {"name": "b"}], "vip": true}));
        assert_eq!(compiled.sql(), "((\"name\"=$1) OR (\"name\"=$2)) AND \"vip\"=$3");

        let compiled = where_sql(json!({"vip": true, "and": [{"age": 1}, {"or": [{"name": "a"}, {"name": "b"}]}]}));
        assert_eq!(
            compiled.sql(),
            "\"vip\"=$1 AND ((\"age\"=$2) AND (((\"name\"=$3) OR (\"name\"=$4))))"
        );
    }

    #[test]
    fn test_combinator_drops_empty_children() {
        let compiled = where_sql(json!({"and": [{"nope": 1}, {"age": 2}]}));
        assert_eq!(compiled.sql(), "(\"age\"=$1)");

        let compiled = where_sql(json!({"or": []}));
        assert!(compiled.fragment.is_empty());
    }

    #[test]
    fn test_placeholder_count_matches_leaf_values() {
        let filters = [
            json!({"age": 1}),
            json!({"and": [{"age": {"inq": [1, 2, 3]}}, {"or": [{"name": "x"}, {"vip": false}]}]}),
            json!({"or": [{"and": [{"age": {"between": [1, 2]}}]}, {"name": {"like": "a%"}}]}),
            json!({"tags": {"contains": ["a", "b", "c"]}, "name": {"match": "cat"}}),
        ];
        let expected = [1, 5, 3, 4];
        for (filter, expected) in filters.iter().zip(expected) {
            let compiled = where_sql(filter.clone());
            assert_eq!(compiled.params().len(), expected, "filter {}", filter);
            assert_eq!(count_placeholders(compiled.sql()), expected, "filter {}", filter);
        }
    }

    #[test]
    fn test_pattern_operators() {
        let compiled = where_sql(json!({"name": {"like": "a%"}}));
        assert_eq!(compiled.sql(), "\"name\" LIKE $1 ESCAPE E'\\\\'");

        let compiled = where_sql(json!({"name": {"nlike": "a%"}}));
        assert_eq!(compiled.sql(), "\"name\" NOT LIKE $1 ESCAPE E'\\\\'");

        let compiled = where_sql(json!({"name": {"ilike": "a%"}}));
        assert_eq!(compiled.sql(), "\"name\" ILIKE $1 ESCAPE E'\\\\'");

        let compiled = where_sql(json!({"name": {"nilike": "a%"}, "age": 1}));
        assert_eq!(compiled.sql(), "\"name\" NOT ILIKE $1 ESCAPE E'\\\\' AND \"age\"=$2");
    }

    #[test]
    fn test_regexp() {
        let compiled = where_sql(json!({"name": {"regexp": "^A"}}));
        assert_eq!(compiled.sql(), "\"name\" ~ $1");
        assert_eq!(compiled.params(), &[SqlValue::Text("^A".into())]);
        assert!(compiled.warnings.is_empty());

        let compiled = where_sql(json!({"name": {"regexp": "/^a/i"}}));
        assert_eq!(compiled.sql(), "\"name\" ~* $1");
        assert_eq!(compiled.params(), &[SqlValue::Text("^a".into())]);
        assert!(compiled.warnings.is_empty());
    }

    #[test]
    fn test_regexp_global_flag_warns() {
        let compiled = where_sql(json!({"name": {"regexp": "/^a/g"}}));
        assert_eq!(compiled.sql(), "\"name\" ~ $1");
        assert_eq!(compiled.warnings.len(), 1);
        assert_eq!(compiled.warnings[0].property, "name");

        let compiled = where_sql(json!({"name": {"regexp": {"source": "x", "flags": "mi"}}}));
        assert_eq!(compiled.sql(), "\"name\" ~* $1");
        assert_eq!(compiled.warnings.len(), 1);
    }

    #[test]
    fn test_array_operators() {
        let compiled = where_sql(json!({"tags": {"contains": ["a", "b"]}}));
        assert_eq!(compiled.sql(), "\"tags\" @> array[$1,$2]::TEXT[]");

        let compiled = where_sql(json!({"tags": {"containedBy": ["a"]}}));
        assert_eq!(compiled.sql(), "\"tags\" <@ array[$1]::TEXT[]");

        let compiled = where_sql(json!({"tags": {"containsAnyOf": ["a", "b"]}}));
        assert_eq!(compiled.sql(), "\"tags\" && array[$1,$2]::TEXT[]");

        let tree = FilterTree::from_json(&json!({"name": {"contains": ["a"]}})).unwrap();
        assert!(matches!(compile_where(&customer(), &tree), Err(ConnectorError::Query(_))));
    }

    #[test]
    fn test_full_text_match() {
        let compiled = where_sql(json!({"name": {"match": "fat & rat"}}));
        assert_eq!(compiled.sql(), "to_tsvector(\"name\") @@ to_tsquery($1)");
        assert_eq!(compiled.params(), &[SqlValue::Text("fat & rat".into())]);
    }

    #[test]
    fn test_invalid_value_for_column_type() {
        let tree = FilterTree::from_json(&json!({"age": "old"})).unwrap();
        assert!(matches!(
            compile_where(&customer(), &tree),
            Err(ConnectorError::Validation(_))
        ));
    }

    #[test]
    fn test_select_default_id_sort() {
        let compiled = compile_select(&customer(), &Filter::new(), IdSortPolicy::Always).unwrap();
        assert_eq!(
            compiled.sql(),
            format!("SELECT {} FROM \"public\".\"customer\" ORDER BY \"id\"", COLS)
        );

        let compiled = compile_select(&customer(), &Filter::new(), IdSortPolicy::Never).unwrap();
        assert_eq!(compiled.sql(), format!("SELECT {} FROM \"public\".\"customer\"", COLS));
    }

    #[test]
    fn test_model_sort_setting_overrides_connector() {
        let model = customer().with_default_id_sort(IdSortPolicy::Never);
        let compiled = compile_select(&model, &Filter::new(), IdSortPolicy::Always).unwrap();
        assert!(!compiled.sql().contains("ORDER BY"));

        let model = customer().with_default_id_sort(IdSortPolicy::Always);
        let compiled = compile_select(&model, &Filter::new(), IdSortPolicy::Never).unwrap();
        assert!(compiled.sql().ends_with("ORDER BY \"id\""));
    }

    #[test]
    fn test_numeric_id_only_policy() {
        assert!(!sorts_by_id(&customer(), IdSortPolicy::NumericIdOnly));
        assert!(sorts_by_id(&numeric_model(), IdSortPolicy::NumericIdOnly));

        let compiled = compile_select(&numeric_model(), &Filter::new(), IdSortPolicy::NumericIdOnly).unwrap();
        assert_eq!(
            compiled.sql(),
            "SELECT \"id\",\"value\" FROM \"public\".\"counter\" ORDER BY \"id\""
        );

        let no_ids = ModelDefinition::new("Log").with_property("msg", PropertyDefinition::new(PropertyType::String));
        assert!(!sorts_by_id(&no_ids, IdSortPolicy::Always));
    }

    #[test]
    fn test_select_full_clause_order() {
        let filter = Filter::from_json(&json!({
            "where": {"age": {"gt": 21}},
            "order": ["age DESC", "name"],
            "limit": 5,
            "offset": 10
        }))
        .unwrap();
        let compiled = compile_select(&customer(), &filter, IdSortPolicy::Always).unwrap();
        assert_eq!(
            compiled.sql(),
            format!(
                "SELECT {} FROM \"public\".\"customer\" WHERE \"age\">$1 ORDER BY \"age\" DESC,\"name\" ASC LIMIT 5 OFFSET 10",
                COLS
            )
        );
        assert_eq!(compiled.params(), &[SqlValue::BigInt(21)]);
    }

    #[test]
    fn test_explicit_order_on_unknown_property_suppresses_default() {
        let filter = Filter::new().order_by("bogus", SortDirection::Desc);
        let compiled = compile_select(&customer(), &filter, IdSortPolicy::Always).unwrap();
        assert!(!compiled.sql().contains("ORDER BY"));
    }

    #[test]
    fn test_select_fields() {
        let filter = Filter::new().fields(["name", "id", "bogus"]);
        let compiled = compile_select(&customer(), &filter, IdSortPolicy::Never).unwrap();
        assert_eq!(compiled.sql(), "SELECT \"id\",\"name\" FROM \"public\".\"customer\"");

        let filter = Filter::from_json(&json!({"fields": {"address": false, "tags": false, "location": false}})).unwrap();
        let compiled = compile_select(&customer(), &filter, IdSortPolicy::Never).unwrap();
        assert_eq!(
            compiled.sql(),
            "SELECT \"id\",\"name\",\"age\",\"vip\",\"firstname\" FROM \"public\".\"customer\""
        );
    }

    #[test]
    fn test_select_warnings_surface() {
        let filter = Filter::from_json(&json!({"where": {"name": {"regexp": "/x/gm"}}})).unwrap();
        let compiled = QueryCompiler::new(IdSortPolicy::Never)
            .compile_select(&customer(), &filter)
            .unwrap();
        assert_eq!(compiled.warnings.len(), 1);
    }

    #[test]
    fn test_count() {
        let filter = Filter::from_json(&json!({"where": {"vip": true}})).unwrap();
        let compiled = build_count(&customer(), &filter).unwrap();
        assert_eq!(
            compiled.sql(),
            "SELECT count(*) AS \"cnt\" FROM \"public\".\"customer\" WHERE \"vip\"=$1"
        );
    }

    #[test]
    fn test_insert() {
        let data = json!({"name": "n", "age": 3, "location": {"lat": 1, "lng": 2}, "bogus": 1});
        let fragment = build_insert(&customer(), data.as_object().unwrap()).unwrap();
        assert_eq!(
            fragment.sql(),
            "INSERT INTO \"public\".\"customer\" (\"name\",\"age\",\"location\") VALUES ($1,$2,$3::point) RETURNING \"id\""
        );
        assert_eq!(
            fragment.params(),
            &[
                SqlValue::Text("n".into()),
                SqlValue::BigInt(3),
                SqlValue::Text("(2,1)".into())
            ]
        );
    }

    #[test]
    fn test_insert_skips_null_generated_id() {
        let data = json!({"id": null});
        let fragment = build_insert(&numeric_model(), data.as_object().unwrap()).unwrap();
        assert_eq!(
            fragment.sql(),
            "INSERT INTO \"public\".\"counter\" DEFAULT VALUES RETURNING \"id\""
        );
        assert!(fragment.params().is_empty());
    }

    #[test]
    fn test_update() {
        let tree = FilterTree::from_json(&json!({"id": "c1"})).unwrap();
        let data = json!({"name": "z", "id": "other", "firstName": "Zed"});
        let compiled = build_update(&customer(), Some(&tree), data.as_object().unwrap()).unwrap();
        assert_eq!(
            compiled.sql(),
            "UPDATE \"public\".\"customer\" SET \"name\"=$1,\"firstname\"=$2 WHERE \"id\"=$3"
        );
        assert_eq!(
            compiled.params(),
            &[
                SqlValue::Text("z".into()),
                SqlValue::Text("Zed".into()),
                SqlValue::Text("c1".into())
            ]
        );

        let data = json!({"id": "only-id"});
        assert!(matches!(
            build_update(&customer(), None, data.as_object().unwrap()),
            Err(ConnectorError::Query(_))
        ));
    }

    #[test]
    fn test_delete() {
        let tree = FilterTree::from_json(&json!({"age": {"lt": 18}})).unwrap();
        let compiled = build_delete(&customer(), Some(&tree)).unwrap();
        assert_eq!(compiled.sql(), "DELETE FROM \"public\".\"customer\" WHERE \"age\"<$1");

        let compiled = build_delete(&customer(), None).unwrap();
        assert_eq!(compiled.sql(), "DELETE FROM \"public\".\"customer\"");
    }

    #[test]
    fn test_values_never_inlined() {
        let hostile = "x'; DROP TABLE customer; --";
        let compiled = where_sql(json!({"name": hostile, "address.city": hostile}));
        assert!(!compiled.sql().contains("DROP"));
        assert_eq!(compiled.params().len(), 2);
        assert_eq!(compiled.params()[0], SqlValue::Text(hostile.into()));
    }

    #[test]
    fn test_schema_qualified_and_quoted() {
        let model = customer().with_schema("Sales").with_table("Customer Data");
        let compiled = compile_select(&model, &Filter::new(), IdSortPolicy::Never).unwrap();
        assert!(compiled.sql().ends_with("FROM \"Sales\".\"Customer Data\""));
    }

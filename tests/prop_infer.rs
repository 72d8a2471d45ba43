use bson::Bson;
use bson::oid::ObjectId;
use proptest::prelude::*;
use resourcekit::query::{Predicate, infer};

proptest! {
    #[test]
    fn prop_finite_numbers_infer_exact(x in any::<f64>().prop_filter("finite", |f| f.is_finite())) {
        let raw = x.to_string();
        prop_assume!(ObjectId::parse_str(&raw).is_err());
        let p = infer("n", &raw).unwrap();
        let Predicate::Exact(b) = p else { return Err(TestCaseError::fail("not exact")) };
        let got = match b {
            Bson::Int64(i) => i as f64,
            Bson::Double(f) => f,
            other => return Err(TestCaseError::fail(format!("unexpected {other:?}"))),
        };
        prop_assert_eq!(got, x);
    }

    #[test]
    fn prop_integers_infer_int64(i in any::<i64>()) {
        prop_assert_eq!(infer("n", &i.to_string()).unwrap(), Predicate::Exact(Bson::Int64(i)));
    }

    #[test]
    fn prop_hex_ids_infer_id(s in "[0-9a-fA-F]{24}") {
        let oid = ObjectId::parse_str(&s).unwrap();
        prop_assert_eq!(infer("id", &s).unwrap(), Predicate::Id(oid));
    }

    #[test]
    fn prop_words_infer_case_insensitive_substring(s in "[a-z]{1,12}") {
        prop_assume!(s != "true" && s != "false");
        let Predicate::Regex(p) = infer("name", &s).unwrap() else {
            return Err(TestCaseError::fail("not a regex"));
        };
        let upper = s.to_uppercase();
        let haystack = format!("x{upper}y");
        prop_assert!(p.is_match(&haystack));
    }
}

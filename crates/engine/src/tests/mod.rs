mod helpers;

mod table_cache_tests;

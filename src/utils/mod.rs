pub mod db_utils;
pub mod role_cache;

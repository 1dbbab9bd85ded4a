pub mod calculator;
pub mod code;
pub mod exclude;
pub mod fetch_meta;
pub mod numeric;
pub mod pcre;
pub mod simple;
pub mod stack;
pub mod uppercase;

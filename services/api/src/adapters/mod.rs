pub mod db;
pub mod hs_llm;

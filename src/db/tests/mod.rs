pub mod helpers;
mod tests_flush;
mod tests_open;
mod tests_put_get;

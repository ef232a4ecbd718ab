/// Read-through caching over a Redis [`Cache`](crate::db::Cache).
///
/// Returns the cached value when present. Otherwise awaits `$block`,
/// queues the result for a background write with `$ttl` seconds to live,
/// and returns it. Errors from the lookup or the block propagate with `?`.
///
/// # Example
/// ```rust,ignore
/// let items: Vec<WatchListItem> = cached!(cache, key, 7200, async {
///     db.list_watchlist(&filter).await
/// })?;
/// ```
#[macro_export]
macro_rules! cached {
    ($cache:expr, $key:expr, $ttl:expr, $block:expr) => {{
        if let Some(cached) = $cache.get_from_cache(&$key).await? {
            Ok(cached)
        } else {
            let value = $block.await?;
            $cache.set_in_background(&$key, &value, $ttl);
            Ok(value)
        }
    }};
}

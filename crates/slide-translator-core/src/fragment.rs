use indexmap::IndexMap;

/// Fragment id to source text, in extraction order.
///
/// Ids encode the fragment's structural location (`slide_3_shape_1`,
/// `slide_2_table_4_r0_c1`, ...) and are unique within a job.
pub type FragmentSet = IndexMap<String, String>;

/// Fragment id to translated text.
pub type TranslationResult = IndexMap<String, String>;

/// Ids of `fragments` absent from `result`, in fragment order.
pub fn missing_ids(fragments: &FragmentSet, result: &TranslationResult) -> Vec<String> {
    fragments
        .keys()
        .filter(|id| !result.contains_key(*id))
        .cloned()
        .collect()
}

/// Sub-mapping of `fragments` for the given ids. Unknown ids are skipped.
pub fn select<'a, I>(fragments: &FragmentSet, ids: I) -> FragmentSet
where
    I: IntoIterator<Item = &'a String>,
{
    ids.into_iter()
        .filter_map(|id| fragments.get(id).map(|text| (id.clone(), text.clone())))
        .collect()
}

use super::composition::CompositionStep;

/// Maximal run of adjacent steps that execute together.
#[derive(Debug)]
pub struct StepGroup<'a> {
    /// Shared parallel tag, `None` for a lone untagged step.
    pub tag: Option<&'a str>,
    pub steps: Vec<&'a CompositionStep>,
}

impl StepGroup<'_> {
    pub fn is_parallel(&self) -> bool {
        self.steps.len() > 1
    }
}

/// Partition steps into execution groups, preserving order.
///
/// Adjacent steps sharing a parallel tag form one group. Untagged steps are
/// always alone. A tag that reappears after a different step starts a new
/// group rather than joining the earlier one.
pub fn group_steps(steps: &[CompositionStep]) -> Vec<StepGroup<'_>> {
    let mut groups: Vec<StepGroup<'_>> = Vec::new();
    for step in steps {
        let tag = step.parallel_tag();
        match groups.last_mut() {
            Some(last) if tag.is_some() && last.tag == tag => last.steps.push(step),
            _ => groups.push(StepGroup {
                tag,
                steps: vec![step],
            }),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(steps: &[CompositionStep]) -> Vec<Vec<String>> {
        group_steps(steps)
            .iter()
            .map(|g| g.steps.iter().map(|s| s.skill_id.clone()).collect())
            .collect()
    }

    #[test]
    fn untagged_steps_run_alone() {
        let steps = vec![CompositionStep::new("a"), CompositionStep::new("b")];
        assert_eq!(shape(&steps), vec![vec!["a"], vec!["b"]]);
    }

    #[test]
    fn adjacent_tags_merge() {
        let steps = vec![
            CompositionStep::new("a"),
            CompositionStep::new("b").parallel("media"),
            CompositionStep::new("c").parallel("media"),
            CompositionStep::new("d"),
        ];
        let groups = group_steps(&steps);
        assert_eq!(shape(&steps), vec![vec!["a"], vec!["b", "c"], vec!["d"]]);
        assert!(groups[1].is_parallel());
        assert_eq!(groups[1].tag, Some("media"));
    }

    #[test]
    fn interrupted_tag_starts_a_new_group() {
        let steps = vec![
            CompositionStep::new("a").parallel("x"),
            CompositionStep::new("b"),
            CompositionStep::new("c").parallel("x"),
        ];
        assert_eq!(shape(&steps), vec![vec!["a"], vec!["b"], vec!["c"]]);
    }

    #[test]
    fn different_tags_do_not_merge() {
        let steps = vec![
            CompositionStep::new("a").parallel("x"),
            CompositionStep::new("b").parallel("y"),
            CompositionStep::new("c").parallel("y"),
        ];
        assert_eq!(shape(&steps), vec![vec!["a"], vec!["b", "c"]]);
    }

    #[test]
    fn empty_input_yields_no_groups() {
        assert!(group_steps(&[]).is_empty());
    }
}

pub mod data;
pub mod text;

#[cfg(test)]
pub(crate) fn test_ctx(skill_id: &str) -> skillforge_core::types::SkillContext {
    use skillforge_core::types::*;

    SkillContext {
        execution_id: ExecutionId::new(),
        skill_id: skill_id.to_string(),
        triggered_by: "test".into(),
        trigger_source: TriggerSource::Manual,
        started_at: chrono::Utc::now(),
        config: SkillConfig::default(),
        listing_id: None,
        campaign_id: None,
        parent_execution_id: None,
        shared_context: None,
        cancel: tokio_util::sync::CancellationToken::new(),
    }
}

use autoprocess::gateway::{CallKind, GatewayError, ScriptedBackend};
use autoprocess::pipelines::{
    CleaningTask, DataCleaningPipeline, DataTransformationPipeline, FeatureEngineeringPipeline,
    FeatureTask, PipelineOutcome, SkewCorrectionPipeline, SkewTask, TransformationTask,
};
use autoprocess::AutoprocessError;
use polars::prelude::*;
use std::sync::Arc;

/// Ten rows, one missing age, one categorical column.
fn customers() -> DataFrame {
    df! [
        "age" => [
            Some(23.0), Some(31.0), None, Some(45.0), Some(27.0),
            Some(38.0), Some(52.0), Some(29.0), Some(41.0), Some(34.0)
        ],
        "city" => [
            "Pune", "Delhi", "Pune", "Mumbai", "Delhi",
            "Pune", "Pune", "Mumbai", "Delhi", "Pune"
        ]
    ]
    .unwrap()
}

fn scripted(texts: &[&str]) -> Arc<ScriptedBackend> {
    Arc::new(ScriptedBackend::from_texts(texts.iter().copied()))
}

#[tokio::test]
async fn test_cleaning_missing_values_only() {
    let backend = scripted(&[
        "ok",
        "{\"missing_values\": {\"method\": \"impute\"}}",
        "import pandas as pd\ndf['age_cleaned'] = df['age'].fillna(df['age'].median())",
        "production-ready",
    ]);
    let pipeline = DataCleaningPipeline::with_backend(backend.clone()).await;
    let task = CleaningTask {
        outlier: false,
        duplicate: false,
        ..CleaningTask::default()
    }
    .with_target("age");

    let outcome = pipeline.clean(&customers(), &task).await.unwrap();
    assert!(outcome.code().unwrap().contains("age_cleaned"));

    let strategy = backend.prompt_text(1).unwrap();
    let tasks_line = strategy.lines().last().unwrap();
    assert_eq!(tasks_line, "Tasks to include: Missing Values");
    assert!(strategy.contains("\"missing_pct\":10.0"));
    assert!(strategy.contains("Target Variable: age"));
}

#[tokio::test]
async fn test_preamble_is_cut_at_first_import() {
    let backend = scripted(&[
        "ok",
        "plan",
        "Some preamble text import pandas as pd\ndf = df.drop_duplicates()",
        "no errors",
    ]);
    let pipeline = DataCleaningPipeline::with_backend(backend).await;
    let outcome = pipeline.clean(&customers(), &CleaningTask::default()).await.unwrap();
    assert_eq!(outcome.code(), Some("import pandas as pd\ndf = df.drop_duplicates()"));
}

#[tokio::test]
async fn test_first_validation_production_ready() {
    let backend = scripted(&[
        "ok",
        "plan",
        "import pandas as pd\ndf['city_transformed'] = 1",
        "Production-Ready.",
    ]);
    let pipeline = DataTransformationPipeline::with_backend(backend.clone()).await;
    let outcome = pipeline
        .transform(&customers(), &TransformationTask::default())
        .await
        .unwrap();
    assert_eq!(outcome.code(), Some("import pandas as pd\ndf['city_transformed'] = 1"));

    let transcript = pipeline.gateway().unwrap().transcript();
    assert_eq!(transcript.count(CallKind::Validation), 1);
    assert_eq!(transcript.count(CallKind::Refinement), 0);
    assert_eq!(backend.remaining(), 0);
}

#[tokio::test]
async fn test_zero_iterations_returns_first_draft() {
    let backend = scripted(&["ok", "plan", "import pandas as pd", "Missing outlier handling"]);
    let pipeline = DataCleaningPipeline::with_backend(backend.clone()).await;
    let task = CleaningTask {
        max_iterations: 0,
        ..CleaningTask::default()
    };

    let outcome = pipeline.clean(&customers(), &task).await.unwrap();
    assert_eq!(outcome.code(), Some("import pandas as pd"));

    let transcript = pipeline.gateway().unwrap().transcript();
    assert_eq!(transcript.count(CallKind::Validation), 1);
    assert_eq!(transcript.count(CallKind::Refinement), 0);
}

#[tokio::test]
async fn test_validation_calls_bounded_without_affirmative_feedback() {
    let mut texts = vec!["ok", "plan", "import pandas as pd"];
    for _ in 0..2 {
        texts.push("Add comments");
        texts.push("import pandas as pd\n# revised");
    }
    let backend = scripted(&texts);
    let pipeline = DataTransformationPipeline::with_backend(backend.clone()).await;
    let task = TransformationTask {
        max_iterations: 2,
        ..TransformationTask::default()
    };

    let outcome = pipeline.transform(&customers(), &task).await.unwrap();
    assert_eq!(outcome.code(), Some("import pandas as pd\n# revised"));

    let transcript = pipeline.gateway().unwrap().transcript();
    assert!(transcript.count(CallKind::Validation) <= task.max_iterations + 1);
    assert_eq!(transcript.count(CallKind::Refinement), 2);
}

#[tokio::test]
async fn test_report_and_reject_credential_policies() {
    let invalid = || {
        Arc::new(ScriptedBackend::new(vec![Err(GatewayError::Api {
            status: 400,
            message: "API key not valid".to_string(),
        })]))
    };

    let cleaning = DataCleaningPipeline::with_backend(invalid()).await;
    let outcome = cleaning.clean(&customers(), &CleaningTask::default()).await.unwrap();
    assert_eq!(serde_json::to_string(&outcome).unwrap(), r#"{"error":"API not valid"}"#);

    let transformation = DataTransformationPipeline::with_backend(invalid()).await;
    assert!(!transformation.is_usable());

    let features = FeatureEngineeringPipeline::with_backend(invalid()).await;
    assert!(matches!(features, Err(AutoprocessError::InvalidCredential(_))));

    let skew = SkewCorrectionPipeline::with_backend(invalid()).await;
    assert!(matches!(skew, Err(AutoprocessError::InvalidCredential(_))));
}

#[tokio::test]
async fn test_feature_engineering_degrades_on_refinement_failure() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        Ok("ok".to_string()),
        Ok("plan".to_string()),
        Ok("import pandas as pd".to_string()),
        Ok("Add the _engineered suffix".to_string()),
        Err(GatewayError::Transport("reset".to_string())),
        Ok("VALID".to_string()),
    ]));
    let pipeline = FeatureEngineeringPipeline::with_backend(backend).await.unwrap();
    let outcome = pipeline.engineer_features(&customers(), &FeatureTask::new("age")).await;
    assert_eq!(outcome, PipelineOutcome::Code("import pandas as pd".to_string()));
}

#[tokio::test]
async fn test_skew_correction_raises_instead_of_envelope() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        Ok("ok".to_string()),
        Err(GatewayError::EmptyCompletion),
    ]));
    let pipeline = SkewCorrectionPipeline::with_backend(backend).await.unwrap();
    let err = pipeline
        .correct_skew(&customers(), &SkewTask::new("age"))
        .await
        .unwrap_err();
    assert!(matches!(err, AutoprocessError::StrategyGenerationFailed(_)));
}

#[tokio::test]
async fn test_profile_in_prompt_is_deterministic() {
    let first = scripted(&["ok", "plan", "import pandas as pd", "production-ready"]);
    let second = scripted(&["ok", "plan", "import pandas as pd", "production-ready"]);

    for backend in [&first, &second] {
        let pipeline = DataCleaningPipeline::with_backend(backend.clone()).await;
        pipeline.clean(&customers(), &CleaningTask::default()).await.unwrap();
    }

    assert_eq!(first.prompt_text(1), second.prompt_text(1));
}

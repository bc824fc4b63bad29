use crate::error::{AppError, AppResult, DetectionError, FileError};
use crate::models::detection::Detection;
use crate::models::figure::ManuscriptStructure;
use std::collections::HashMap;
use std::path::Path;
use tokio::fs;

/// 从 JSON 文件加载稿件结构
pub async fn load_manuscript_structure(path: &Path) -> AppResult<ManuscriptStructure> {
    let content = read_existing(path).await?;

    let structure: ManuscriptStructure = serde_json::from_str(&content)
        .map_err(|e| AppError::json_parse_failed(path.display().to_string(), e))?;

    let panel_count: usize = structure.figures.iter().map(|f| f.panels.len()).sum();
    tracing::info!(
        "成功加载稿件 {}: {} 张图, {} 个子图",
        structure.manuscript_id,
        structure.figures.len(),
        panel_count
    );

    Ok(structure)
}

/// 将稿件结构写回 JSON 文件
pub async fn save_manuscript_structure(
    structure: &ManuscriptStructure,
    path: &Path,
) -> AppResult<()> {
    let content = serde_json::to_string_pretty(structure)
        .map_err(|e| AppError::json_parse_failed(path.display().to_string(), e))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| AppError::file_write_failed(parent.display().to_string(), e))?;
    }

    fs::write(path, content)
        .await
        .map_err(|e| AppError::file_write_failed(path.display().to_string(), e))?;

    tracing::info!("结果已写入: {}", path.display());
    Ok(())
}

/// 加载检测结果文件
///
/// 文件格式：图标签 -> `[{"bbox": [x1, y1, x2, y2], "confidence": 0.9}, ...]`
pub async fn load_detections(path: &Path) -> AppResult<HashMap<String, Vec<Detection>>> {
    let content = read_existing(path).await?;

    let detections: HashMap<String, Vec<Detection>> =
        serde_json::from_str(&content).map_err(|e| {
            AppError::Detection(DetectionError::InvalidFormat {
                path: path.display().to_string(),
                message: e.to_string(),
            })
        })?;

    let total: usize = detections.values().map(Vec::len).sum();
    tracing::info!(
        "成功加载检测结果: {} 张图, 共 {} 个区域",
        detections.len(),
        total
    );

    Ok(detections)
}

async fn read_existing(path: &Path) -> AppResult<String> {
    if !path.exists() {
        return Err(AppError::File(FileError::NotFound {
            path: path.display().to_string(),
        }));
    }

    fs::read_to_string(path)
        .await
        .map_err(|e| AppError::file_read_failed(path.display().to_string(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::panel::Panel;

    #[tokio::test]
    async fn test_structure_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("structure.json");
        std::fs::write(
            &input,
            r#"{
                "manuscript_id": "EMBOJ-2024-0001",
                "xml": "content/EMBOJ.xml",
                "figures": [{
                    "figure_label": "Figure 1",
                    "img_files": ["graphic/fig1.png"],
                    "sd_files": [],
                    "figure_caption": "Caption",
                    "panels": [{"panel_label": "A", "panel_caption": "x", "sd_files": ["a.csv"]}]
                }]
            }"#,
        )
        .unwrap();

        let mut structure = load_manuscript_structure(&input).await.unwrap();
        assert_eq!(structure.manuscript_id, "EMBOJ-2024-0001");
        structure.figures[0].panels.push(Panel::new("B", "y"));

        let output = dir.path().join("out").join("result.json");
        save_manuscript_structure(&structure, &output).await.unwrap();

        let reloaded = load_manuscript_structure(&output).await.unwrap();
        assert_eq!(reloaded.figures[0].panels.len(), 2);
        assert_eq!(reloaded.extra["xml"], serde_json::json!("content/EMBOJ.xml"));
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let err = load_manuscript_structure(Path::new("/nonexistent/structure.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::File(FileError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_load_detections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detections.json");
        std::fs::write(
            &path,
            r#"{"Figure 1": [{"bbox": [0.1, 0.1, 0.2, 0.2], "confidence": 0.9}]}"#,
        )
        .unwrap();

        let detections = load_detections(&path).await.unwrap();
        assert_eq!(detections["Figure 1"].len(), 1);
        assert_eq!(detections["Figure 1"][0].confidence, 0.9);

        std::fs::write(&path, r#"{"Figure 1": [{"bbox": [0.1], "confidence": 0.9}]}"#).unwrap();
        let err = load_detections(&path).await.unwrap_err();
        assert!(matches!(err, AppError::Detection(_)));
    }
}

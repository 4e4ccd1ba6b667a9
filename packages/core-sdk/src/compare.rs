use futures_util::future::join;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::credentials::CredentialStore;
use crate::history::HistoryStore;
use crate::llm::LlmClient;
use crate::models::{HistoryEntry, ModelSelection, ProviderKind, ProviderResult};
use crate::storage::KeyValueStore;
use crate::telemetry;

/**
 * \brief 提交被直接退回空闲状态的原因。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Notice {
    EmptyPrompt,
    KeysMissing,
}

impl Notice {
    pub fn message(self) -> &'static str {
        match self {
            Notice::EmptyPrompt => "Enter a prompt to compare.",
            Notice::KeysMissing => {
                "API keys missing: save both a Gemini and a Groq key in settings first."
            }
        }
    }
}

/**
 * \brief 单次提交的状态机。
 */
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ComparisonState {
    Idle {
        notice: Option<Notice>,
    },
    Validating {
        prompt: String,
    },
    InFlight {
        prompt: String,
        gemini: Option<ProviderResult>,
        groq: Option<ProviderResult>,
    },
    Completed {
        entry: HistoryEntry,
        gemini: ProviderResult,
        groq: ProviderResult,
    },
}

/**
 * \brief 对比进行中发出的事件，可交给 `ComparisonState::apply` 推进状态。
 */
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ComparisonEvent {
    Started {
        prompt: String,
    },
    ProviderFinished {
        provider: ProviderKind,
        result: ProviderResult,
    },
    Completed {
        entry: HistoryEntry,
    },
    Blocked {
        notice: Notice,
    },
}

impl Default for ComparisonState {
    fn default() -> Self {
        ComparisonState::Idle { notice: None }
    }
}

impl ComparisonState {
    /**
     * \brief Idle -> Validating（prompt 去空白后非空），否则保持空闲。
     */
    pub fn submit(prompt: &str) -> Self {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            ComparisonState::Idle {
                notice: Some(Notice::EmptyPrompt),
            }
        } else {
            ComparisonState::Validating {
                prompt: prompt.to_string(),
            }
        }
    }

    /**
     * \brief 两把密钥都存在时 Validating -> InFlight，否则回到 Idle。
     */
    pub fn validate(self, keys_present: bool) -> Self {
        match self {
            ComparisonState::Validating { prompt } if keys_present => ComparisonState::InFlight {
                prompt,
                gemini: None,
                groq: None,
            },
            ComparisonState::Validating { .. } => ComparisonState::Idle {
                notice: Some(Notice::KeysMissing),
            },
            other => other,
        }
    }

    pub fn apply(self, event: &ComparisonEvent) -> Self {
        match (self, event) {
            (_, ComparisonEvent::Blocked { notice }) => ComparisonState::Idle {
                notice: Some(*notice),
            },
            (_, ComparisonEvent::Started { prompt }) => ComparisonState::InFlight {
                prompt: prompt.clone(),
                gemini: None,
                groq: None,
            },
            (
                ComparisonState::InFlight {
                    prompt,
                    mut gemini,
                    mut groq,
                },
                ComparisonEvent::ProviderFinished { provider, result },
            ) => {
                match provider {
                    ProviderKind::Gemini => gemini = Some(result.clone()),
                    ProviderKind::Groq => groq = Some(result.clone()),
                }
                ComparisonState::InFlight {
                    prompt,
                    gemini,
                    groq,
                }
            }
            (
                ComparisonState::InFlight {
                    gemini: Some(gemini),
                    groq: Some(groq),
                    ..
                },
                ComparisonEvent::Completed { entry },
            ) => ComparisonState::Completed {
                entry: entry.clone(),
                gemini,
                groq,
            },
            (state, _) => state,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(
            self,
            ComparisonState::Validating { .. } | ComparisonState::InFlight { .. }
        )
    }
}

/**
 * \brief 把同一 prompt 发给两个 Provider，并把结果写入历史。
 */
pub struct Comparator<'a, S: KeyValueStore + ?Sized> {
    client: &'a LlmClient,
    store: &'a S,
}

impl<'a, S: KeyValueStore + ?Sized> Comparator<'a, S> {
    pub fn new(client: &'a LlmClient, store: &'a S) -> Self {
        Self { client, store }
    }

    /**
     * \brief 提交 prompt；被拦截时返回 `Idle`，否则返回 `Completed`。
     * \details 每个 Provider 的结果一到就发到 `events`；两边都结束后只写入一条历史。
     */
    pub async fn run(
        &self,
        prompt: &str,
        selection: &ModelSelection,
        events: Option<UnboundedSender<ComparisonEvent>>,
    ) -> ComparisonState {
        let emit = |event: ComparisonEvent| {
            if let Some(tx) = events.as_ref() {
                let _ = tx.send(event);
            }
        };

        let state = ComparisonState::submit(prompt);
        let ComparisonState::Validating { prompt } = &state else {
            if let ComparisonState::Idle {
                notice: Some(notice),
            } = &state
            {
                emit(ComparisonEvent::Blocked { notice: *notice });
            }
            return state;
        };
        let prompt = prompt.clone();

        let keys = self.load_keys();
        let state = state.validate(keys.is_some());
        let Some((gemini_key, groq_key)) = keys else {
            telemetry::log_event("compare", "blocked: keys missing");
            emit(ComparisonEvent::Blocked {
                notice: Notice::KeysMissing,
            });
            return state;
        };

        emit(ComparisonEvent::Started {
            prompt: prompt.clone(),
        });

        let gemini_call = async {
            let result = self
                .client
                .fetch_gemini(&prompt, &gemini_key, &selection.gemini)
                .await;
            emit(ComparisonEvent::ProviderFinished {
                provider: ProviderKind::Gemini,
                result: result.clone(),
            });
            result
        };
        let groq_call = async {
            let result = self
                .client
                .fetch_groq(&prompt, &groq_key, &selection.groq)
                .await;
            emit(ComparisonEvent::ProviderFinished {
                provider: ProviderKind::Groq,
                result: result.clone(),
            });
            result
        };
        let (gemini, groq) = join(gemini_call, groq_call).await;

        let entry = HistoryEntry::new(&prompt, &gemini, &groq);
        if let Err(err) = HistoryStore::new(self.store).append(entry.clone()) {
            tracing::warn!(error = %err, "failed to record history entry");
            telemetry::log_error("compare", &format!("history append failed: {}", err));
        }
        telemetry::log_event(
            "compare",
            &format!(
                "prompt_len={} gemini_ok={} groq_ok={}",
                prompt.len(),
                !gemini.is_error(),
                !groq.is_error()
            ),
        );

        let completed = ComparisonEvent::Completed { entry };
        let state = state
            .apply(&ComparisonEvent::ProviderFinished {
                provider: ProviderKind::Gemini,
                result: gemini,
            })
            .apply(&ComparisonEvent::ProviderFinished {
                provider: ProviderKind::Groq,
                result: groq,
            })
            .apply(&completed);
        emit(completed);
        state
    }

    fn load_keys(&self) -> Option<(String, String)> {
        let creds = CredentialStore::new(self.store);
        let keys = creds
            .has_both(ProviderKind::Gemini, ProviderKind::Groq)
            .and_then(|present| {
                if !present {
                    return Ok(None);
                }
                Ok(creds
                    .get(ProviderKind::Gemini)?
                    .zip(creds.get(ProviderKind::Groq)?))
            });
        match keys {
            Ok(keys) => keys,
            Err(err) => {
                tracing::warn!(error = %err, "reading API keys failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NO_RESPONSE_PLACEHOLDER;
    use crate::storage::MemoryStore;
    use crate::test_support::MockServer;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn store_with_keys(gemini: Option<&str>, groq: Option<&str>) -> MemoryStore {
        let store = MemoryStore::new();
        let creds = CredentialStore::new(&store);
        if let Some(k) = gemini {
            creds.set(ProviderKind::Gemini, k).unwrap();
        }
        if let Some(k) = groq {
            creds.set(ProviderKind::Groq, k).unwrap();
        }
        store
    }

    fn gemini_ok(text: &str) -> String {
        json!({"candidates": [{"content": {"parts": [{"text": text}]}}]}).to_string()
    }

    fn groq_ok(text: &str) -> String {
        json!({"choices": [{"message": {"content": text}}]}).to_string()
    }

    fn drain(mut rx: mpsc::UnboundedReceiver<ComparisonEvent>) -> Vec<ComparisonEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn test_missing_key_blocks_without_network() {
        let gemini = MockServer::start(vec![(200, gemini_ok("g"))]).await;
        let groq = MockServer::start(vec![(200, groq_ok("q"))]).await;
        let client =
            LlmClient::with_bases(&gemini.url, &groq.url, Duration::from_secs(5)).unwrap();
        let store = store_with_keys(Some("gem-key"), None);
        let (tx, rx) = mpsc::unbounded_channel();

        let state = Comparator::new(&client, &store)
            .run("hello", &ModelSelection::default(), Some(tx))
            .await;

        assert_eq!(
            state,
            ComparisonState::Idle {
                notice: Some(Notice::KeysMissing)
            }
        );
        assert_eq!(gemini.request_count(), 0);
        assert_eq!(groq.request_count(), 0);
        assert!(HistoryStore::new(&store).list().unwrap().is_empty());
        assert_eq!(
            drain(rx),
            vec![ComparisonEvent::Blocked {
                notice: Notice::KeysMissing
            }]
        );
    }

    #[tokio::test]
    async fn test_whitespace_key_counts_as_missing() {
        let gemini = MockServer::start(vec![(200, gemini_ok("g"))]).await;
        let groq = MockServer::start(vec![(200, groq_ok("q"))]).await;
        let client =
            LlmClient::with_bases(&gemini.url, &groq.url, Duration::from_secs(5)).unwrap();
        let store = store_with_keys(Some("gem-key"), None);
        store.set(ProviderKind::Groq.credential_key(), "   ").unwrap();

        let state = Comparator::new(&client, &store)
            .run("hello", &ModelSelection::default(), None)
            .await;

        assert_eq!(
            state,
            ComparisonState::Idle {
                notice: Some(Notice::KeysMissing)
            }
        );
        assert_eq!(gemini.request_count(), 0);
        assert_eq!(groq.request_count(), 0);
    }

    #[tokio::test]
    async fn test_blank_prompt_stays_idle() {
        let client = LlmClient::with_bases("http://unused", "http://unused", Duration::from_secs(1))
            .unwrap();
        let store = store_with_keys(Some("gem-key"), Some("gsk-key"));
        let state = Comparator::new(&client, &store)
            .run("   \n", &ModelSelection::default(), None)
            .await;
        assert_eq!(
            state,
            ComparisonState::Idle {
                notice: Some(Notice::EmptyPrompt)
            }
        );
        assert!(HistoryStore::new(&store).list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_completed_run_writes_one_entry_with_both_sides() {
        let gemini = MockServer::start(vec![(200, gemini_ok("Gemini says hi"))]).await;
        let groq = MockServer::start(vec![(
            401,
            json!({"error": {"message": "Invalid API Key", "code": "invalid_api_key"}}).to_string(),
        )])
        .await;
        let client =
            LlmClient::with_bases(&gemini.url, &groq.url, Duration::from_secs(5)).unwrap();
        let store = store_with_keys(Some("gem-key"), Some("gsk-bad"));
        let (tx, rx) = mpsc::unbounded_channel();

        let state = Comparator::new(&client, &store)
            .run("  Compare Quantum computing ", &ModelSelection::default(), Some(tx))
            .await;

        let ComparisonState::Completed {
            entry,
            gemini: g,
            groq: q,
        } = state
        else {
            panic!("expected completed state");
        };
        assert_eq!(g, ProviderResult::success("Gemini says hi"));
        assert_eq!(q.error.as_deref(), Some("Error: Invalid API Key"));
        assert_eq!(entry.prompt, "Compare Quantum computing");
        assert_eq!(entry.gemini_response, "Gemini says hi");
        assert_eq!(entry.groq_response, "Error: Invalid API Key");

        let list = HistoryStore::new(&store).list().unwrap();
        assert_eq!(list, vec![entry.clone()]);

        let events = drain(rx);
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], ComparisonEvent::Started { .. }));
        assert!(events[1..3]
            .iter()
            .all(|e| matches!(e, ComparisonEvent::ProviderFinished { .. })));
        assert_eq!(events[3], ComparisonEvent::Completed { entry });
    }

    #[tokio::test]
    async fn test_empty_successes_record_placeholder() {
        let gemini = MockServer::start(vec![(200, r#"{"candidates": []}"#.into())]).await;
        let groq = MockServer::start(vec![(200, r#"{"choices": []}"#.into())]).await;
        let client =
            LlmClient::with_bases(&gemini.url, &groq.url, Duration::from_secs(5)).unwrap();
        let store = store_with_keys(Some("gem-key"), Some("gsk-key"));

        Comparator::new(&client, &store)
            .run("anything", &ModelSelection::default(), None)
            .await;

        let entry = &HistoryStore::new(&store).list().unwrap()[0];
        assert_eq!(entry.gemini_response, NO_RESPONSE_PLACEHOLDER);
        assert_eq!(entry.groq_response, NO_RESPONSE_PLACEHOLDER);
    }

    #[tokio::test]
    async fn test_hung_provider_does_not_block_completion() {
        let gemini = MockServer::silent().await;
        let groq = MockServer::start(vec![(200, groq_ok("fast answer"))]).await;
        let client =
            LlmClient::with_bases(&gemini.url, &groq.url, Duration::from_millis(300)).unwrap();
        let store = store_with_keys(Some("gem-key"), Some("gsk-key"));
        let (tx, rx) = mpsc::unbounded_channel();

        let state = Comparator::new(&client, &store)
            .run("slow one", &ModelSelection::default(), Some(tx))
            .await;

        assert!(!state.is_loading());
        let entry = &HistoryStore::new(&store).list().unwrap()[0];
        assert_eq!(entry.groq_response, "fast answer");
        assert!(entry.gemini_response.contains("timed out"));

        // the fast provider is reported before the timed-out one
        let events = drain(rx);
        assert_eq!(
            events[1],
            ComparisonEvent::ProviderFinished {
                provider: ProviderKind::Groq,
                result: ProviderResult::success("fast answer"),
            }
        );
    }

    #[test]
    fn test_state_transitions() {
        let state = ComparisonState::submit("  hi ");
        assert_eq!(
            state,
            ComparisonState::Validating {
                prompt: "hi".into()
            }
        );
        assert!(state.is_loading());

        let state = state.validate(true);
        assert!(matches!(state, ComparisonState::InFlight { .. }));

        let state = state.apply(&ComparisonEvent::ProviderFinished {
            provider: ProviderKind::Groq,
            result: ProviderResult::success("q"),
        });
        assert!(state.is_loading());

        let entry = HistoryEntry::new(
            "hi",
            &ProviderResult::success("g"),
            &ProviderResult::success("q"),
        );
        // completion before both results are in is ignored
        let state = state.apply(&ComparisonEvent::Completed {
            entry: entry.clone(),
        });
        assert!(matches!(
            state,
            ComparisonState::InFlight {
                gemini: None,
                groq: Some(_),
                ..
            }
        ));

        let state = state
            .apply(&ComparisonEvent::ProviderFinished {
                provider: ProviderKind::Gemini,
                result: ProviderResult::success("g"),
            })
            .apply(&ComparisonEvent::Completed { entry });
        assert!(matches!(state, ComparisonState::Completed { .. }));
        assert!(!state.is_loading());
    }

    #[test]
    fn test_validate_without_keys_returns_to_idle() {
        let state = ComparisonState::submit("hi").validate(false);
        assert_eq!(
            state,
            ComparisonState::Idle {
                notice: Some(Notice::KeysMissing)
            }
        );
    }

    #[test]
    fn test_provider_result_outside_flight_is_ignored() {
        let state = ComparisonState::default().apply(&ComparisonEvent::ProviderFinished {
            provider: ProviderKind::Gemini,
            result: ProviderResult::success("late"),
        });
        assert_eq!(state, ComparisonState::Idle { notice: None });
    }
}

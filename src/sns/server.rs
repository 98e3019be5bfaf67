//! SNS query-protocol wire layer: form-encoded requests in, XML documents
//! out. Indexed request shapes (`X.entry.N.key`, `X.member.N`) are scanned
//! until the first gap; responses are emitted through a small element
//! writer instead of per-action templates.

use std::collections::HashMap;
use std::fmt::Write;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use crate::auth::RequestContext;

use super::error::SnsError;
use super::state::SnsState;
use super::types::*;

const XMLNS: &str = "http://sns.amazonaws.com/doc/2010-03-31/";

/// Decoded form parameters of one query-protocol request.
pub struct Params {
    values: HashMap<String, String>,
}

impl Params {
    pub fn from_body(body: &[u8]) -> Params {
        Params {
            values: form_urlencoded::parse(body).into_owned().collect(),
        }
    }

    pub fn action(&self) -> Option<&str> {
        self.values.get("Action").map(String::as_str)
    }

    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn require(&self, key: &str) -> Result<String, SnsError> {
        self.get(key).ok_or_else(|| {
            SnsError::InvalidParameter(format!("Missing required parameter: {key}"))
        })
    }

    /// `<prefix>.entry.N.key` / `.value` pairs, 1-indexed up to the first gap.
    fn attribute_entries(&self, prefix: &str) -> HashMap<String, String> {
        (1..)
            .map_while(|i| {
                Some((
                    self.get(&format!("{prefix}.entry.{i}.key"))?,
                    self.get(&format!("{prefix}.entry.{i}.value"))?,
                ))
            })
            .collect()
    }

    /// `<prefix>.member.N.Key` / `.Value` pairs.
    fn tag_members(&self, prefix: &str) -> Vec<(String, String)> {
        (1..)
            .map_while(|i| {
                Some((
                    self.get(&format!("{prefix}.member.{i}.Key"))?,
                    self.get(&format!("{prefix}.member.{i}.Value"))?,
                ))
            })
            .collect()
    }

    /// Plain `<prefix>.member.N` string list.
    fn string_members(&self, prefix: &str) -> Vec<String> {
        (1..)
            .map_while(|i| self.get(&format!("{prefix}.member.{i}")))
            .collect()
    }

    /// Message attributes: `<prefix>.entry.N.Name` plus the `.Value.*`
    /// triple. A missing DataType defaults to String.
    fn message_attributes(&self, prefix: &str) -> HashMap<String, SnsMessageAttribute> {
        (1..)
            .map_while(|i| {
                let name = self.get(&format!("{prefix}.entry.{i}.Name"))?;
                let attr = SnsMessageAttribute {
                    data_type: self
                        .get(&format!("{prefix}.entry.{i}.Value.DataType"))
                        .unwrap_or_else(|| "String".into()),
                    string_value: self.get(&format!("{prefix}.entry.{i}.Value.StringValue")),
                    binary_value: self.get(&format!("{prefix}.entry.{i}.Value.BinaryValue")),
                };
                Some((name, attr))
            })
            .collect()
    }

    fn publish_entries(&self, prefix: &str) -> Vec<PublishBatchEntry> {
        (1..)
            .map_while(|i| {
                let member = format!("{prefix}.member.{i}");
                Some(PublishBatchEntry {
                    id: self.get(&format!("{member}.Id"))?,
                    message: self.get(&format!("{member}.Message"))?,
                    subject: self.get(&format!("{member}.Subject")),
                    message_attributes: self
                        .message_attributes(&format!("{member}.MessageAttributes")),
                    message_deduplication_id: self
                        .get(&format!("{member}.MessageDeduplicationId")),
                    message_group_id: self.get(&format!("{member}.MessageGroupId")),
                })
            })
            .collect()
    }
}

fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Incremental writer for `<{Action}Response>` documents. The accumulated
/// elements land inside `<{Action}Result>`; the response-metadata envelope
/// is added on finish.
struct QueryXml {
    action: &'static str,
    body: String,
}

impl QueryXml {
    fn new(action: &'static str) -> QueryXml {
        QueryXml {
            action,
            body: String::new(),
        }
    }

    fn text(mut self, name: &str, value: &str) -> Self {
        let _ = write!(self.body, "<{name}>{}</{name}>", xml_escape(value));
        self
    }

    fn opt_text(self, name: &str, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.text(name, value),
            None => self,
        }
    }

    fn nest(mut self, name: &str, build: impl FnOnce(QueryXml) -> QueryXml) -> Self {
        let _ = write!(self.body, "<{name}>");
        self = build(self);
        let _ = write!(self.body, "</{name}>");
        self
    }

    fn into_response(self) -> Response {
        let action = self.action;
        let xml = format!(
            "<{action}Response xmlns=\"{XMLNS}\"><{action}Result>{}</{action}Result>\
             <ResponseMetadata><RequestId>{}</RequestId></ResponseMetadata></{action}Response>",
            self.body,
            Uuid::new_v4(),
        );
        (StatusCode::OK, [("content-type", "text/xml")], xml).into_response()
    }
}

fn attributes_result(xml: QueryXml, attrs: &HashMap<String, String>) -> QueryXml {
    let mut keys: Vec<&String> = attrs.keys().collect();
    keys.sort();
    xml.nest("Attributes", |mut x| {
        for key in keys {
            x = x.nest("entry", |e| e.text("key", key).text("value", &attrs[key]));
        }
        x
    })
}

fn subscriptions_result(
    xml: QueryXml,
    subs: &[SubscriptionEntry],
    next_token: Option<&str>,
) -> QueryXml {
    xml.nest("Subscriptions", |mut x| {
        for s in subs {
            x = x.nest("member", |m| {
                m.text("TopicArn", &s.topic_arn)
                    .text("Protocol", &s.protocol)
                    .text("SubscriptionArn", &s.subscription_arn)
                    .text("Owner", &s.owner)
                    .text("Endpoint", &s.endpoint)
            });
        }
        x
    })
    .opt_text("NextToken", next_token)
}

pub async fn handle(
    state: &SnsState,
    ctx: &RequestContext,
    params: Params,
) -> Result<Response, SnsError> {
    let action = params
        .action()
        .map(str::to_string)
        .ok_or_else(|| SnsError::InvalidAction("Missing Action parameter".into()))?;

    match action.as_str() {
        "CreateTopic" => {
            let attributes = params.attribute_entries("Attributes");
            let resp = state
                .create_topic(
                    ctx,
                    CreateTopicRequest {
                        name: params.require("Name")?,
                        attributes: (!attributes.is_empty()).then_some(attributes),
                        tags: params.tag_members("Tags"),
                    },
                )
                .await?;
            Ok(QueryXml::new("CreateTopic")
                .text("TopicArn", &resp.topic_arn)
                .into_response())
        }
        "DeleteTopic" => {
            state.delete_topic(ctx, &params.require("TopicArn")?).await?;
            Ok(QueryXml::new("DeleteTopic").into_response())
        }
        "ListTopics" => {
            let resp = state.list_topics(ctx, params.get("NextToken")).await?;
            Ok(QueryXml::new("ListTopics")
                .nest("Topics", |mut x| {
                    for t in &resp.topics {
                        x = x.nest("member", |m| m.text("TopicArn", &t.topic_arn));
                    }
                    x
                })
                .opt_text("NextToken", resp.next_token.as_deref())
                .into_response())
        }
        "GetTopicAttributes" => {
            let attrs = state
                .get_topic_attributes(ctx, &params.require("TopicArn")?)
                .await?;
            Ok(attributes_result(QueryXml::new("GetTopicAttributes"), &attrs).into_response())
        }
        "SetTopicAttributes" => {
            state
                .set_topic_attributes(
                    ctx,
                    &params.require("TopicArn")?,
                    &params.require("AttributeName")?,
                    params.get("AttributeValue"),
                )
                .await?;
            Ok(QueryXml::new("SetTopicAttributes").into_response())
        }
        "Subscribe" => {
            let attributes = params.attribute_entries("Attributes");
            let resp = state
                .subscribe(
                    ctx,
                    SubscribeRequest {
                        topic_arn: params.require("TopicArn")?,
                        protocol: params.require("Protocol")?,
                        endpoint: params.get("Endpoint"),
                        attributes: (!attributes.is_empty()).then_some(attributes),
                    },
                )
                .await?;
            Ok(QueryXml::new("Subscribe")
                .text("SubscriptionArn", &resp.subscription_arn)
                .into_response())
        }
        "Unsubscribe" => {
            state.unsubscribe(&params.require("SubscriptionArn")?).await?;
            Ok(QueryXml::new("Unsubscribe").into_response())
        }
        "ConfirmSubscription" => {
            let topic_arn = params.require("TopicArn")?;
            params.require("Token")?;
            let subscription_arn = state.confirm_subscription(ctx, &topic_arn).await?;
            Ok(QueryXml::new("ConfirmSubscription")
                .text("SubscriptionArn", &subscription_arn)
                .into_response())
        }
        "ListSubscriptions" => {
            let resp = state.list_subscriptions(ctx).await?;
            Ok(subscriptions_result(
                QueryXml::new("ListSubscriptions"),
                &resp.subscriptions,
                resp.next_token.as_deref(),
            )
            .into_response())
        }
        "ListSubscriptionsByTopic" => {
            let resp = state
                .list_subscriptions_by_topic(ctx, &params.require("TopicArn")?)
                .await?;
            Ok(subscriptions_result(
                QueryXml::new("ListSubscriptionsByTopic"),
                &resp.subscriptions,
                resp.next_token.as_deref(),
            )
            .into_response())
        }
        "GetSubscriptionAttributes" => {
            let attrs = state
                .get_subscription_attributes(&params.require("SubscriptionArn")?)
                .await?;
            Ok(
                attributes_result(QueryXml::new("GetSubscriptionAttributes"), &attrs)
                    .into_response(),
            )
        }
        "SetSubscriptionAttributes" => {
            state
                .set_subscription_attributes(
                    &params.require("SubscriptionArn")?,
                    &params.require("AttributeName")?,
                    params.get("AttributeValue"),
                )
                .await?;
            Ok(QueryXml::new("SetSubscriptionAttributes").into_response())
        }
        "Publish" => publish(state, ctx, &params).await,
        "PublishBatch" => publish_batch(state, ctx, &params).await,
        "TagResource" => {
            state
                .tag_resource(
                    ctx,
                    &params.require("ResourceArn")?,
                    params.tag_members("Tags"),
                )
                .await?;
            Ok(QueryXml::new("TagResource").into_response())
        }
        "UntagResource" => {
            state
                .untag_resource(
                    ctx,
                    &params.require("ResourceArn")?,
                    params.string_members("TagKeys"),
                )
                .await?;
            Ok(QueryXml::new("UntagResource").into_response())
        }
        "ListTagsForResource" => {
            let tags = state
                .list_tags_for_resource(ctx, &params.require("ResourceArn")?)
                .await?;
            Ok(QueryXml::new("ListTagsForResource")
                .nest("Tags", |mut x| {
                    for (key, value) in &tags {
                        x = x.nest("member", |m| m.text("Key", key).text("Value", value));
                    }
                    x
                })
                .into_response())
        }
        other => Err(SnsError::InvalidAction(format!("Unknown action: {other}"))),
    }
}

async fn publish(
    state: &SnsState,
    ctx: &RequestContext,
    params: &Params,
) -> Result<Response, SnsError> {
    let req = PublishRequest {
        topic_arn: params.get("TopicArn"),
        target_arn: params.get("TargetArn"),
        message: params.require("Message")?,
        subject: params.get("Subject"),
        message_attributes: params.message_attributes("MessageAttributes"),
        message_deduplication_id: params.get("MessageDeduplicationId"),
        message_group_id: params.get("MessageGroupId"),
    };
    let resp = state.publish(ctx, req).await?;
    Ok(QueryXml::new("Publish")
        .text("MessageId", &resp.message_id)
        .opt_text("SequenceNumber", resp.sequence_number.as_deref())
        .into_response())
}

async fn publish_batch(
    state: &SnsState,
    ctx: &RequestContext,
    params: &Params,
) -> Result<Response, SnsError> {
    let topic_arn = params.require("TopicArn")?;
    let entries = params.publish_entries("PublishBatchRequestEntries");
    let resp = state.publish_batch(ctx, &topic_arn, entries).await?;

    Ok(QueryXml::new("PublishBatch")
        .nest("Successful", |mut x| {
            for s in &resp.successful {
                x = x.nest("member", |m| {
                    m.text("Id", &s.id)
                        .text("MessageId", &s.message_id)
                        .opt_text("SequenceNumber", s.sequence_number.as_deref())
                });
            }
            x
        })
        .nest("Failed", |mut x| {
            for f in &resp.failed {
                x = x.nest("member", |m| {
                    m.text("Id", &f.id)
                        .text("Code", &f.code)
                        .text("Message", &f.message)
                        .text("SenderFault", if f.sender_fault { "true" } else { "false" })
                });
            }
            x
        })
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Params {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (k, v) in pairs {
            serializer.append_pair(k, v);
        }
        Params::from_body(serializer.finish().as_bytes())
    }

    #[test]
    fn indexed_scans_stop_at_the_first_gap() {
        let p = params(&[
            ("Attributes.entry.1.key", "a"),
            ("Attributes.entry.1.value", "1"),
            ("Attributes.entry.2.key", "b"),
            ("Attributes.entry.2.value", "2"),
            ("Attributes.entry.4.key", "orphan"),
            ("Attributes.entry.4.value", "x"),
        ]);
        let attrs = p.attribute_entries("Attributes");
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs.get("b").map(String::as_str), Some("2"));
        assert!(!attrs.contains_key("orphan"));
    }

    #[test]
    fn message_attribute_triples() {
        let p = params(&[
            ("MessageAttributes.entry.1.Name", "eventType"),
            ("MessageAttributes.entry.1.Value.DataType", "String"),
            ("MessageAttributes.entry.1.Value.StringValue", "order.created"),
            ("MessageAttributes.entry.2.Name", "untyped"),
            ("MessageAttributes.entry.2.Value.StringValue", "v"),
        ]);
        let attrs = p.message_attributes("MessageAttributes");
        assert_eq!(
            attrs["eventType"].string_value.as_deref(),
            Some("order.created")
        );
        assert_eq!(attrs["untyped"].data_type, "String");
    }

    #[test]
    fn writer_escapes_and_nests() {
        let xml = QueryXml::new("Probe")
            .text("Plain", "a<b&c>\"d\"")
            .nest("List", |x| x.nest("member", |m| m.text("Id", "1")));
        assert_eq!(
            xml.body,
            "<Plain>a&lt;b&amp;c&gt;&quot;d&quot;</Plain><List><member><Id>1</Id></member></List>"
        );
    }
}

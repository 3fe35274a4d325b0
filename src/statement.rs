//! Recognition of the SQL-callable authentication functions.
//!
//! Statements such as `SELECT auth_user_add(?, ?, 1);` are intercepted before
//! they reach SQLite and routed to the matching connection method. Anything
//! that is not a call to one of these functions is left alone.

use std::fmt;

use nom::IResult;
use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, tag_no_case, take_while1},
    character::complete::{char, digit1, multispace0, multispace1},
    combinator::{eof, map, map_res, opt, peek, recognize, value},
    multi::{many0, separated_list0},
    sequence::{delimited, pair, terminated, tuple},
};

use crate::error::{AuthError, Result};

/// A bound parameter or literal argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Integer(i64),
    Text(String),
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Integer(i64::from(b))
    }
}

impl Value {
    fn into_text(self, function: &str) -> Result<String> {
        match self {
            Value::Text(s) => Ok(s),
            other => Err(AuthError::Statement(format!(
                "{function}: expected text argument, got {other:?}"
            ))),
        }
    }

    fn into_flag(self, function: &str) -> Result<bool> {
        match self {
            Value::Integer(n) => Ok(n != 0),
            other => Err(AuthError::Statement(format!(
                "{function}: expected integer or boolean argument, got {other:?}"
            ))),
        }
    }
}

/// A parsed and bound call to one of the authentication functions.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthCall {
    Authenticate {
        username: String,
        password: String,
    },
    AddUser {
        username: String,
        password: String,
        is_admin: bool,
    },
    ChangeUser {
        username: String,
        password: String,
        is_admin: bool,
    },
    DeleteUser {
        username: String,
    },
    Enabled,
}

impl AuthCall {
    /// SQL name of the function this call invokes.
    pub fn function_name(&self) -> &'static str {
        match self {
            AuthCall::Authenticate { .. } => Function::Authenticate.name(),
            AuthCall::AddUser { .. } => Function::UserAdd.name(),
            AuthCall::ChangeUser { .. } => Function::UserChange.name(),
            AuthCall::DeleteUser { .. } => Function::UserDelete.name(),
            AuthCall::Enabled => Function::Enabled.name(),
        }
    }

    fn username(&self) -> Option<&str> {
        match self {
            AuthCall::Authenticate { username, .. }
            | AuthCall::AddUser { username, .. }
            | AuthCall::ChangeUser { username, .. }
            | AuthCall::DeleteUser { username } => Some(username),
            AuthCall::Enabled => None,
        }
    }
}

// Passwords stay out of logs and panic messages.
impl fmt::Debug for AuthCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct(self.function_name());
        if let Some(username) = self.username() {
            out.field("username", &username);
        }
        if let AuthCall::AddUser { is_admin, .. } | AuthCall::ChangeUser { is_admin, .. } = self {
            out.field("is_admin", is_admin);
        }
        out.finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    Authenticate,
    UserAdd,
    UserChange,
    UserDelete,
    Enabled,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "authenticate" => Some(Function::Authenticate),
            "auth_user_add" => Some(Function::UserAdd),
            "auth_user_change" => Some(Function::UserChange),
            "auth_user_delete" => Some(Function::UserDelete),
            "auth_enabled" => Some(Function::Enabled),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Function::Authenticate => "authenticate",
            Function::UserAdd => "auth_user_add",
            Function::UserChange => "auth_user_change",
            Function::UserDelete => "auth_user_delete",
            Function::Enabled => "auth_enabled",
        }
    }

    fn arity(self) -> usize {
        match self {
            Function::Authenticate => 2,
            Function::UserAdd | Function::UserChange => 3,
            Function::UserDelete => 1,
            Function::Enabled => 0,
        }
    }

    fn build(self, args: Vec<Value>) -> Result<AuthCall> {
        let name = self.name();
        if args.len() != self.arity() {
            return Err(AuthError::Statement(format!(
                "{name} takes {} arguments, got {}",
                self.arity(),
                args.len()
            )));
        }
        let mut args = args.into_iter();
        // arity checked above
        let mut next = || args.next().unwrap_or(Value::Null);
        Ok(match self {
            Function::Authenticate => AuthCall::Authenticate {
                username: next().into_text(name)?,
                password: next().into_text(name)?,
            },
            Function::UserAdd => AuthCall::AddUser {
                username: next().into_text(name)?,
                password: next().into_text(name)?,
                is_admin: next().into_flag(name)?,
            },
            Function::UserChange => AuthCall::ChangeUser {
                username: next().into_text(name)?,
                password: next().into_text(name)?,
                is_admin: next().into_flag(name)?,
            },
            Function::UserDelete => AuthCall::DeleteUser {
                username: next().into_text(name)?,
            },
            Function::Enabled => AuthCall::Enabled,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Arg {
    Placeholder,
    Literal(Value),
}

fn string_literal(input: &str) -> IResult<&str, String> {
    delimited(
        char('\''),
        map(
            many0(alt((is_not("'"), value("'", tag("''"))))),
            |parts: Vec<&str>| parts.concat(),
        ),
        char('\''),
    )(input)
}

fn integer(input: &str) -> IResult<&str, i64> {
    map_res(recognize(pair(opt(char('-')), digit1)), |s: &str| {
        s.parse::<i64>()
    })(input)
}

fn arg(input: &str) -> IResult<&str, Arg> {
    alt((
        value(Arg::Placeholder, char('?')),
        map(string_literal, |s| Arg::Literal(Value::Text(s))),
        map(integer, |n| Arg::Literal(Value::Integer(n))),
        value(Arg::Literal(Value::Integer(1)), tag_no_case("true")),
        value(Arg::Literal(Value::Integer(0)), tag_no_case("false")),
        value(Arg::Literal(Value::Null), tag_no_case("null")),
    ))(input)
}

fn arg_list(input: &str) -> IResult<&str, Vec<Arg>> {
    delimited(
        pair(char('('), multispace0),
        separated_list0(tuple((multispace0, char(','), multispace0)), arg),
        pair(multispace0, char(')')),
    )(input)
}

fn call_head(input: &str) -> IResult<&str, &str> {
    let (input, _) = multispace0(input)?;
    let (input, _) = opt(terminated(tag_no_case("select"), multispace1))(input)?;
    let (input, name) = take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_')(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = peek(char('('))(input)?;
    Ok((input, name))
}

fn call_tail(input: &str) -> IResult<&str, Vec<Arg>> {
    let (input, args) = arg_list(input)?;
    let (input, _) = tuple((multispace0, opt(char(';')), multispace0))(input)?;
    let (input, _) = eof(input)?;
    Ok((input, args))
}

/// Parse `sql` as a call to one of the authentication functions, binding `?`
/// placeholders positionally from `params`.
///
/// Returns `Ok(None)` for any other statement.
pub fn parse_call(sql: &str, params: &[Value]) -> Result<Option<AuthCall>> {
    let Ok((rest, name)) = call_head(sql) else {
        return Ok(None);
    };
    let Some(function) = Function::from_name(name) else {
        return Ok(None);
    };
    let (_, args) = call_tail(rest).map_err(|e| {
        AuthError::Statement(format!("malformed call to {}: {e}", function.name()))
    })?;

    let mut params = params.iter();
    let values = args
        .into_iter()
        .map(|arg| match arg {
            Arg::Placeholder => params.next().cloned().ok_or_else(|| {
                AuthError::Statement(format!("{}: missing parameter", function.name()))
            }),
            Arg::Literal(v) => Ok(v),
        })
        .collect::<Result<Vec<_>>>()?;
    if params.next().is_some() {
        return Err(AuthError::Statement(format!(
            "{}: too many parameters",
            function.name()
        )));
    }

    function.build(values).map(Some)
}

/// Whether `sql` names any of `names` as an identifier anywhere, quoted or not.
///
/// Errs towards matching: a string literal with the same text also counts.
pub fn references_any(sql: &str, names: &[&str]) -> bool {
    sql.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .any(|word| names.iter().any(|name| word.eq_ignore_ascii_case(name)))
}

/// Whether `sql` is a statement that produces rows, judged by its first keyword.
pub fn returns_rows(sql: &str) -> bool {
    let first = sql
        .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .unwrap_or_default();
    ["select", "with", "values", "pragma", "explain"]
        .iter()
        .any(|keyword| first.eq_ignore_ascii_case(keyword))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_literal_add() {
        let call = parse_call("select auth_user_add('user', 'pa''ss', false);", &[])
            .unwrap()
            .unwrap();
        assert_eq!(
            call,
            AuthCall::AddUser {
                username: "user".into(),
                password: "pa'ss".into(),
                is_admin: false,
            }
        );
    }

    #[test]
    fn binds_placeholders_in_order() {
        let params = ["admin2".into(), "secret".into(), Value::Integer(1)];
        let call = parse_call("SELECT AUTH_USER_CHANGE(?, ?, ?)", &params)
            .unwrap()
            .unwrap();
        assert_eq!(
            call,
            AuthCall::ChangeUser {
                username: "admin2".into(),
                password: "secret".into(),
                is_admin: true,
            }
        );
    }

    #[test]
    fn bare_function_call_without_select() {
        let call = parse_call("  auth_user_delete( 'bob' ) ", &[]).unwrap().unwrap();
        assert_eq!(call, AuthCall::DeleteUser { username: "bob".into() });
        let call = parse_call("SELECT auth_enabled();", &[]).unwrap().unwrap();
        assert_eq!(call, AuthCall::Enabled);
    }

    #[test]
    fn other_statements_pass_through() {
        assert_eq!(parse_call("SELECT 1;", &[]).unwrap(), None);
        assert_eq!(
            parse_call("select count(uname) from auth_user", &[]).unwrap(),
            None
        );
        assert_eq!(parse_call("CREATE TABLE t (x)", &[]).unwrap(), None);
    }

    #[test]
    fn parameter_count_mismatch_is_rejected() {
        let err = parse_call("select auth_user_add(?, ?, ?)", &["a".into()]).unwrap_err();
        assert!(matches!(err, AuthError::Statement(_)));

        let err = parse_call("select auth_user_delete(?)", &["a".into(), "b".into()])
            .unwrap_err();
        assert!(matches!(err, AuthError::Statement(_)));
    }

    #[test]
    fn wrong_arity_or_types_are_rejected() {
        assert!(parse_call("select auth_user_delete('a', 'b')", &[]).is_err());
        assert!(parse_call("select auth_user_add(1, 'p', 0)", &[]).is_err());
        assert!(parse_call("select auth_user_add('u', 'p', 'yes')", &[]).is_err());
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        let err = parse_call("select auth_user_delete('a') from t", &[]).unwrap_err();
        assert!(matches!(err, AuthError::Statement(_)));
    }

    #[test]
    fn debug_output_omits_password() {
        let call = parse_call("select authenticate('alice', 'hunter2')", &[])
            .unwrap()
            .unwrap();
        let shown = format!("{call:?}");
        assert!(shown.contains("alice"));
        assert!(!shown.contains("hunter2"));
    }

    #[test]
    fn table_references() {
        let names = ["auth_user", "sqlite_master"];
        assert!(references_any("DELETE FROM auth_user", &names));
        assert!(references_any("select * from \"AUTH_USER\";", &names));
        assert!(references_any("select * from main.[auth_user]", &names));
        assert!(references_any("select name from Sqlite_Master", &names));
        assert!(!references_any("select * from auth_users", &names));
        assert!(!references_any("select 1", &names));
    }

    #[test]
    fn row_returning_statements() {
        assert!(returns_rows("SELECT 1"));
        assert!(returns_rows("  with t(x) as (select 1) select x from t"));
        assert!(returns_rows("PRAGMA table_info(notes)"));
        assert!(returns_rows("(select 1)"));
        assert!(!returns_rows("INSERT INTO notes VALUES ('x')"));
        assert!(!returns_rows("create table selected (x)"));
        assert!(!returns_rows(""));
    }
}

//! Renders the generated in-container runtime artefact.
//!
//! This module produces *text*: a Python script that becomes the sandbox
//! side of the frame protocol described in [`crate::frame`]. The broker
//! never parses or executes Python; it only templates a known-good string
//! and writes it to the invocation's IPC directory before the first
//! container launch.

/// Render the entrypoint script, parameterised by the set of servers
/// discoverable from inside the container (used only for the
/// `list_servers`/discovery helpers the runtime exposes; the actual
/// allowed-set for a given execute is carried on the `execute` frame
/// itself and may be narrower).
pub fn render(known_servers: &[String]) -> String {
    let servers_literal = known_servers
        .iter()
        .map(|s| format!("\"{}\"", s.replace('"', "\\\"")))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"#!/usr/bin/env python3
# Generated entrypoint. Speaks newline-delimited JSON on stdin/stdout.
import ast
import asyncio
import json
import sys
import traceback

_KNOWN_SERVERS = [{servers_literal}]
_pending = {{}}
_next_id = 0
_globals = {{"__name__": "__sandbox__"}}


def _emit(frame):
    line = json.dumps(frame)
    sys.__stdout__.write(line + "\n")
    sys.__stdout__.flush()


class _StreamProxy:
    def __init__(self, kind):
        self._kind = kind
        self._buf = ""

    def write(self, data):
        self._buf += data
        while "\n" in self._buf:
            line, self._buf = self._buf.split("\n", 1)
            _emit({{"type": self._kind, "data": line + "\n"}})

    def flush(self):
        if self._buf:
            _emit({{"type": self._kind, "data": self._buf}})
            self._buf = ""


sys.stdout = _StreamProxy("stdout")
sys.stderr = _StreamProxy("stderr")


async def _rpc_call(payload):
    global _next_id
    request_id = _next_id
    _next_id += 1
    loop = asyncio.get_event_loop()
    fut = loop.create_future()
    _pending[request_id] = fut
    _emit({{"type": "rpc_request", "id": request_id, "payload": payload}})
    return await fut


class _ToolProxy:
    def __init__(self, server):
        self._server = server

    def __getattr__(self, tool_name):
        async def _call(**kwargs):
            result = await _rpc_call(
                {{"type": "call_tool", "server": self._server, "tool": tool_name, "arguments": kwargs}}
            )
            if not result.get("success"):
                raise RuntimeError(result.get("error", "tool call failed"))
            return result.get("result")

        return _call


async def list_servers():
    result = await _rpc_call({{"type": "list_servers"}})
    return result.get("servers", [])


async def search_tool_docs(query, limit=10, detail="summary"):
    result = await _rpc_call(
        {{"type": "search_tool_docs", "query": query, "limit": limit, "detail": detail}}
    )
    return result.get("results", [])


async def query_tool_docs(server, tool=None, detail="summary"):
    result = await _rpc_call(
        {{"type": "query_tool_docs", "server": server, "tool": tool, "detail": detail}}
    )
    return result.get("docs")


def _rebind_proxies(allowed_servers):
    for name in list(_globals.keys()):
        if name.startswith("mcp_"):
            del _globals[name]
    for server in allowed_servers:
        _globals[f"mcp_{{server}}"] = _ToolProxy(server)


async def _run_one(code):
    try:
        compiled = compile(
            code, "<sandbox>", "exec", flags=ast.PyCF_ALLOW_TOP_LEVEL_AWAIT
        )
        result = eval(compiled, _globals)
        if asyncio.iscoroutine(result):
            await result
    except BaseException:
        traceback.print_exc()
    finally:
        sys.stdout.flush()
        sys.stderr.flush()
        _emit({{"type": "execution_done"}})


async def _main():
    loop = asyncio.get_event_loop()
    reader = asyncio.StreamReader()
    protocol = asyncio.StreamReaderProtocol(reader)
    await loop.connect_read_pipe(lambda: protocol, sys.stdin)

    current_task = None
    while True:
        line = await reader.readline()
        if not line:
            break
        try:
            frame = json.loads(line)
        except json.JSONDecodeError:
            continue
        kind = frame.get("type")
        if kind == "execute":
            _rebind_proxies(frame.get("allowed_servers", []))
            _globals["_invocation_id"] = frame.get("invocation_id")
            current_task = asyncio.ensure_future(_run_one(frame.get("code", "")))
        elif kind == "rpc_response":
            fut = _pending.pop(frame.get("id"), None)
            if fut is not None and not fut.done():
                fut.set_result(frame.get("payload", {{}}))
        elif kind == "cancel":
            if current_task is not None:
                current_task.cancel()


if __name__ == "__main__":
    asyncio.run(_main())
"#,
        servers_literal = servers_literal,
    )
}
